//! Detached query-string signatures for the HTTP-Redirect binding.
//!
//! Signing covers the canonical `SAMLRequest|SAMLResponse`, `RelayState`,
//! `SigAlg` parameter string. Verification reconstructs the signed data
//! from the *raw* incoming query string so the IdP's percent-encoding is
//! preserved byte for byte; re-encoding a decoded parameter map would
//! change the signed bytes.

use crate::bindings::HttpRedirectBinding;
use crate::codec;
use crate::error::{SpError, SpResult};

use super::{public_key_from_certificate, SignatureAlgorithm};

/// Signs and verifies HTTP-Redirect query strings.
pub struct RedirectSigner;

impl RedirectSigner {
    /// Signs a canonical query string, returning the base64 signature.
    pub fn sign(
        private_key_der: &[u8],
        canonical_query: &str,
        algorithm: SignatureAlgorithm,
    ) -> SpResult<String> {
        let signature =
            sp_crypto::rsa_sign(private_key_der, canonical_query.as_bytes(), algorithm.rsa())?;
        Ok(codec::base64_encode(&signature))
    }

    /// Verifies the signature on a raw query string against the IdP
    /// certificate.
    pub fn verify(certificate_der: &[u8], raw_query: &str) -> SpResult<()> {
        let (signed_data, signature_param) = HttpRedirectBinding::split_signed_query(raw_query)?;

        let sig_alg_raw = HttpRedirectBinding::raw_query_param(signed_data, "SigAlg")
            .ok_or_else(|| SpError::SignatureInvalid("no SigAlg parameter".to_string()))?;
        let sig_alg_uri = codec::url_decode(sig_alg_raw)
            .map_err(|_| SpError::SignatureInvalid("undecodable SigAlg".to_string()))?;
        let algorithm = SignatureAlgorithm::from_uri(&sig_alg_uri).ok_or_else(|| {
            SpError::SignatureInvalid(format!("unknown signature algorithm '{sig_alg_uri}'"))
        })?;

        let signature_b64 = codec::url_decode(signature_param)
            .map_err(|_| SpError::SignatureInvalid("undecodable Signature".to_string()))?;
        let signature = codec::base64_decode(&signature_b64)
            .map_err(|_| SpError::SignatureInvalid("signature is not base64".to_string()))?;

        let public_key = public_key_from_certificate(certificate_der)?;
        let valid = sp_crypto::rsa_verify(
            &public_key,
            signed_data.as_bytes(),
            &signature,
            algorithm.rsa(),
        )
        .map_err(|e| SpError::SignatureInvalid(e.to_string()))?;

        if valid {
            Ok(())
        } else {
            Err(SpError::SignatureInvalid(
                "redirect signature verification failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::SamlMessageType;

    const KEY_PEM: &str = include_str!("../../tests/fixtures/sp_test_key.pem");
    const CERT_PEM: &str = include_str!("../../tests/fixtures/sp_test_cert.pem");

    fn key_der() -> Vec<u8> {
        sp_crypto::pem_to_der(KEY_PEM, "PRIVATE KEY").unwrap()
    }

    fn cert_der() -> Vec<u8> {
        sp_crypto::pem_to_der(CERT_PEM, "CERTIFICATE").unwrap()
    }

    fn signed_query(xml: &str, relay_state: Option<&str>) -> String {
        let algorithm = SignatureAlgorithm::RsaSha256;
        let canonical = HttpRedirectBinding::canonical_query(
            xml,
            relay_state,
            Some(algorithm.uri()),
            SamlMessageType::Response,
        )
        .unwrap();
        let signature = RedirectSigner::sign(&key_der(), &canonical, algorithm).unwrap();
        format!("{canonical}&Signature={}", codec::url_encode(&signature))
    }

    #[test]
    fn sign_and_verify_raw_query() {
        let raw = signed_query("<LogoutResponse/>", Some("https://sp.example.org/home"));
        RedirectSigner::verify(&cert_der(), &raw).unwrap();
    }

    #[test]
    fn tampered_relay_state_fails() {
        let raw = signed_query("<LogoutResponse/>", Some("https://sp.example.org/home"));
        let tampered = raw.replace("home", "evil");
        let err = RedirectSigner::verify(&cert_der(), &tampered).unwrap_err();
        assert!(matches!(err, SpError::SignatureInvalid(_)));
    }

    #[test]
    fn missing_signature_is_distinct_error() {
        let canonical = HttpRedirectBinding::canonical_query(
            "<LogoutResponse/>",
            None,
            Some(SignatureAlgorithm::RsaSha256.uri()),
            SamlMessageType::Response,
        )
        .unwrap();
        let err = RedirectSigner::verify(&cert_der(), &canonical).unwrap_err();
        assert!(matches!(err, SpError::SignatureMissing(_)));
    }

    #[test]
    fn sha1_signing_is_refused_but_verification_supported() {
        let err = RedirectSigner::sign(&key_der(), "data", SignatureAlgorithm::RsaSha1);
        assert!(err.is_err());
    }
}
