//! Error types for service provider operations.
//!
//! Every failure surfaces to the host as one tagged `SpError`; the host
//! decides the HTTP status. Nothing is recovered internally.

use thiserror::Error;

/// Result type for service provider operations.
pub type SpResult<T> = Result<T, SpError>;

/// Service provider protocol errors.
#[derive(Debug, Error)]
pub enum SpError {
    /// Missing alias, bad metadata XML, unknown binding.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// XML parse failure or a required field absent.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Policy required a signature that was not present.
    #[error("required signature missing: {0}")]
    SignatureMissing(String),

    /// Signature present but verification failed, including certificate
    /// mismatch, digest mismatch, and bad reference URI.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Issuer not found in the metadata store.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Issuer known but outside every circle of trust containing the SP.
    #[error("issuer '{issuer}' shares no circle of trust with '{sp}'")]
    NotInCircleOfTrust {
        /// The SP entity ID.
        sp: String,
        /// The issuer entity ID.
        issuer: String,
    },

    /// Assertion time window failure.
    #[error("assertion expired or not yet valid")]
    AssertionExpiredOrNotYetValid,

    /// SP entity ID not among the assertion audiences.
    #[error("audience mismatch: '{expected}' not in assertion audiences")]
    AudienceMismatch {
        /// The audience that was expected (the SP entity ID).
        expected: String,
    },

    /// StatusCode was not Success; carries the IdP status code.
    #[error("responder failure: {status_code}")]
    ResponderFailure {
        /// The status code URI the IdP returned.
        status_code: String,
    },

    /// InResponseTo not tracked, or an ArtifactResolve/Response mismatch.
    #[error("correlation mismatch: {0}")]
    CorrelationMismatch(String),

    /// RelayState outside the configured whitelist.
    #[error("relay state rejected: {0}")]
    RelayStateRejected(String),

    /// HTTP/TLS/SOAP failure reaching the IdP.
    #[error("back channel error: {0}")]
    BackChannel(String),

    /// The host cancelled a blocking operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl SpError {
    /// Returns the HTTP status code a host would typically map this error to.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MalformedMessage(_) | Self::RelayStateRejected(_) => 400,
            Self::SignatureMissing(_) | Self::SignatureInvalid(_) => 401,
            Self::UnknownIssuer(_)
            | Self::NotInCircleOfTrust { .. }
            | Self::AudienceMismatch { .. }
            | Self::AssertionExpiredOrNotYetValid
            | Self::CorrelationMismatch(_) => 403,
            Self::BackChannel(_) => 502,
            Self::Cancelled => 499,
            _ => 500,
        }
    }
}

impl From<base64::DecodeError> for SpError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedMessage(format!("base64 decode error: {err}"))
    }
}

impl From<std::io::Error> for SpError {
    fn from(err: std::io::Error) -> Self {
        Self::MalformedMessage(format!("deflate error: {err}"))
    }
}

impl From<quick_xml::Error> for SpError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedMessage(format!("XML parse error: {err}"))
    }
}

impl From<reqwest::Error> for SpError {
    fn from(err: reqwest::Error) -> Self {
        Self::BackChannel(err.to_string())
    }
}

impl From<sp_crypto::CryptoError> for SpError {
    fn from(err: sp_crypto::CryptoError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(SpError::MalformedMessage("x".into()).http_status(), 400);
        assert_eq!(SpError::SignatureMissing("x".into()).http_status(), 401);
        assert_eq!(SpError::UnknownIssuer("x".into()).http_status(), 403);
        assert_eq!(SpError::BackChannel("x".into()).http_status(), 502);
        assert_eq!(SpError::Configuration("x".into()).http_status(), 500);
    }

    #[test]
    fn responder_failure_carries_status() {
        let err = SpError::ResponderFailure {
            status_code: "urn:oasis:names:tc:SAML:2.0:status:Responder".into(),
        };
        assert!(err.to_string().contains("status:Responder"));
    }
}
