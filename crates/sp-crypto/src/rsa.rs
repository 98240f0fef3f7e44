//! RSA PKCS#1 v1.5 signing and verification.
//!
//! SHA-1 signatures can be verified for peers that still advertise the
//! `rsa-sha1` algorithm URI, but cannot be created.

use aws_lc_rs::{
    rand::SystemRandom,
    signature::{self, RsaKeyPair, UnparsedPublicKey},
};
use thiserror::Error;

/// Error type for cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The requested algorithm is not available for this operation.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// RSA PKCS#1 v1.5 signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaAlgorithm {
    /// RSA with SHA-1. Verification only.
    Rs1,
    /// RSA with SHA-256.
    Rs256,
    /// RSA with SHA-384.
    Rs384,
    /// RSA with SHA-512.
    Rs512,
}

impl RsaAlgorithm {
    /// Returns true if this algorithm may be used to create signatures.
    #[must_use]
    pub const fn supports_signing(self) -> bool {
        !matches!(self, Self::Rs1)
    }
}

/// Signs data with an RSA private key.
///
/// # Arguments
///
/// * `key_der` - RSA private key in DER form (PKCS#1 or PKCS#8)
/// * `data` - Data to sign
/// * `algorithm` - Signature algorithm; `Rs1` is refused
///
/// # Errors
///
/// Returns an error if the key is invalid, the algorithm cannot sign,
/// or signing fails.
pub fn rsa_sign(
    key_der: &[u8],
    data: &[u8],
    algorithm: RsaAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    let padding = match algorithm {
        RsaAlgorithm::Rs256 => &signature::RSA_PKCS1_SHA256,
        RsaAlgorithm::Rs384 => &signature::RSA_PKCS1_SHA384,
        RsaAlgorithm::Rs512 => &signature::RSA_PKCS1_SHA512,
        RsaAlgorithm::Rs1 => {
            return Err(CryptoError::UnsupportedAlgorithm(
                "refusing to create RSA-SHA1 signatures".to_string(),
            ));
        }
    };

    let key_pair = RsaKeyPair::from_der(key_der)
        .or_else(|_| RsaKeyPair::from_pkcs8(key_der))
        .map_err(|e| CryptoError::InvalidKey(format!("invalid RSA key: {e}")))?;

    let rng = SystemRandom::new();
    let mut sig = vec![0u8; key_pair.public_modulus_len()];
    key_pair
        .sign(padding, &rng, data, &mut sig)
        .map_err(|e| CryptoError::Signing(format!("RSA signing failed: {e}")))?;

    Ok(sig)
}

/// Verifies an RSA PKCS#1 v1.5 signature.
///
/// # Arguments
///
/// * `public_key_der` - RSA public key as DER `SubjectPublicKeyInfo`
/// * `data` - Data that was signed
/// * `sig` - Signature to verify
/// * `algorithm` - Signature algorithm
///
/// Returns `Ok(false)` on a well-formed but wrong signature; errors are
/// reserved for unusable inputs.
pub fn rsa_verify(
    public_key_der: &[u8],
    data: &[u8],
    sig: &[u8],
    algorithm: RsaAlgorithm,
) -> Result<bool, CryptoError> {
    let verification_alg: &dyn signature::VerificationAlgorithm = match algorithm {
        RsaAlgorithm::Rs1 => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        RsaAlgorithm::Rs256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        RsaAlgorithm::Rs384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        RsaAlgorithm::Rs512 => &signature::RSA_PKCS1_2048_8192_SHA512,
    };

    let public_key = UnparsedPublicKey::new(verification_alg, public_key_der);
    match public_key.verify(data, sig) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_signing_is_refused() {
        let err = rsa_sign(b"not a key", b"data", RsaAlgorithm::Rs1).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn invalid_key_is_rejected() {
        let err = rsa_sign(b"not a key", b"data", RsaAlgorithm::Rs256).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }

    #[test]
    fn garbage_signature_does_not_verify() {
        // A bogus SPKI cannot verify anything; verify() maps failure to false.
        let ok = rsa_verify(b"bogus", b"data", b"sig", RsaAlgorithm::Rs256).unwrap();
        assert!(!ok);
    }

    #[test]
    fn algorithm_signing_capability() {
        assert!(!RsaAlgorithm::Rs1.supports_signing());
        assert!(RsaAlgorithm::Rs256.supports_signing());
        assert!(RsaAlgorithm::Rs512.supports_signing());
    }
}
