//! Enveloped XML signature verification.

use crate::codec;
use crate::error::{SpError, SpResult};
use crate::types::transform_algorithms;
use crate::xml;

use super::{build_signed_info, parse_signature, public_key_from_certificate};

/// Verifies enveloped signatures against one expected certificate.
///
/// The expected certificate comes from metadata; an embedded KeyInfo
/// certificate is only accepted when it matches it after whitespace
/// normalization. Trust is pinned, not discovered.
pub struct XmlVerifier {
    expected_certificate_der: Vec<u8>,
    expected_certificate_b64: String,
}

impl XmlVerifier {
    /// Creates a verifier for the given DER certificate.
    #[must_use]
    pub fn new(expected_certificate_der: Vec<u8>) -> Self {
        let expected_certificate_b64 = codec::base64_encode(&expected_certificate_der);
        Self {
            expected_certificate_der,
            expected_certificate_b64,
        }
    }

    /// Verifies the signature element against the document.
    ///
    /// The contract is strict: the single Reference must point at
    /// `#<expected_reference_id>`, the transform set must be exactly
    /// {enveloped-signature, exclusive-c14n}, the digest must match, and
    /// the signing key must be the expected certificate's. Any deviation
    /// is [`SpError::SignatureInvalid`].
    pub fn verify(
        &self,
        document: &str,
        signature_xml: &str,
        expected_reference_id: &str,
    ) -> SpResult<()> {
        let info = parse_signature(signature_xml)?;

        let expected_uri = format!("#{expected_reference_id}");
        if info.reference_uri != expected_uri {
            return Err(SpError::SignatureInvalid(format!(
                "reference URI '{}' does not match expected '{expected_uri}'",
                info.reference_uri
            )));
        }

        let has = |uri: &str| info.transforms.iter().any(|t| t == uri);
        if info.transforms.len() != 2
            || !has(transform_algorithms::ENVELOPED_SIGNATURE)
            || !has(transform_algorithms::EXCLUSIVE_C14N)
        {
            return Err(SpError::SignatureInvalid(format!(
                "unexpected transform set {:?}",
                info.transforms
            )));
        }

        if let Some(embedded) = &info.x509_certificate {
            if *embedded != self.expected_certificate_b64 {
                return Err(SpError::SignatureInvalid(
                    "embedded certificate does not match metadata".to_string(),
                ));
            }
        }

        self.verify_digest(document, expected_reference_id, &info)?;
        self.verify_signature_value(&info)
    }

    /// Recomputes the referenced element's digest with the enveloped
    /// signature removed.
    fn verify_digest(
        &self,
        document: &str,
        reference_id: &str,
        info: &super::XmlSignatureInfo,
    ) -> SpResult<()> {
        let element = xml::element_by_id(document, reference_id).ok_or_else(|| {
            SpError::SignatureInvalid(format!("referenced element '{reference_id}' not found"))
        })?;
        let without_signature = xml::remove_signature_element(element);
        let canonical = xml::canonicalize(&without_signature);
        let digest = info.digest_method.algorithm().digest(canonical.as_bytes());

        if codec::base64_encode(&digest) != info.digest_value {
            return Err(SpError::SignatureInvalid("digest mismatch".to_string()));
        }
        Ok(())
    }

    /// Rebuilds SignedInfo from the parsed fields and checks the RSA
    /// signature over its canonical form.
    fn verify_signature_value(&self, info: &super::XmlSignatureInfo) -> SpResult<()> {
        let transforms: Vec<&str> = info.transforms.iter().map(String::as_str).collect();
        let signed_info = build_signed_info(
            &info.reference_uri,
            &info.digest_value,
            info.algorithm.uri(),
            &info.canonicalization,
            info.digest_method.uri(),
            &transforms,
        );
        let canonical = xml::canonicalize(&signed_info);

        let signature = codec::base64_decode(&info.signature_value)
            .map_err(|_| SpError::SignatureInvalid("undecodable signature value".to_string()))?;
        let public_key = public_key_from_certificate(&self.expected_certificate_der)?;

        let valid = sp_crypto::rsa_verify(
            &public_key,
            canonical.as_bytes(),
            &signature,
            info.algorithm.rsa(),
        )
        .map_err(|e| SpError::SignatureInvalid(e.to_string()))?;

        if valid {
            Ok(())
        } else {
            Err(SpError::SignatureInvalid(
                "signature verification failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{SignatureAlgorithm, XmlSigner};

    const KEY_PEM: &str = include_str!("../../tests/fixtures/sp_test_key.pem");
    const CERT_PEM: &str = include_str!("../../tests/fixtures/sp_test_cert.pem");

    fn key_der() -> Vec<u8> {
        sp_crypto::pem_to_der(KEY_PEM, "PRIVATE KEY").unwrap()
    }

    fn cert_der() -> Vec<u8> {
        sp_crypto::pem_to_der(CERT_PEM, "CERTIFICATE").unwrap()
    }

    fn sample_document() -> String {
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="r1" Version="2.0">
  <saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp.example.org</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
</samlp:Response>"#
            .to_string()
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let signer = XmlSigner::new(key_der(), Some(cert_der()));
        let signed = signer.sign(&sample_document(), "r1").unwrap();
        assert!(signed.contains("<ds:Signature"));
        assert!(signed.contains("<ds:X509Certificate>"));

        let signature = crate::xml::extract_element(&signed, "Signature").unwrap();
        let verifier = XmlVerifier::new(cert_der());
        verifier.verify(&signed, signature, "r1").unwrap();
    }

    #[test]
    fn tampered_content_fails_digest() {
        let signer = XmlSigner::new(key_der(), Some(cert_der()));
        let signed = signer.sign(&sample_document(), "r1").unwrap();
        let tampered = signed.replace("status:Success", "status:Responder");

        let signature = crate::xml::extract_element(&tampered, "Signature").unwrap();
        let verifier = XmlVerifier::new(cert_der());
        let err = verifier.verify(&tampered, signature, "r1").unwrap_err();
        assert!(matches!(err, SpError::SignatureInvalid(_)));
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn wrong_reference_id_is_rejected() {
        let signer = XmlSigner::new(key_der(), Some(cert_der()));
        let signed = signer.sign(&sample_document(), "r1").unwrap();

        let signature = crate::xml::extract_element(&signed, "Signature").unwrap();
        let verifier = XmlVerifier::new(cert_der());
        let err = verifier.verify(&signed, signature, "r2").unwrap_err();
        assert!(matches!(err, SpError::SignatureInvalid(_)));
    }

    #[test]
    fn sha512_signature_roundtrip() {
        let signer = XmlSigner::new(key_der(), Some(cert_der()))
            .with_algorithm(SignatureAlgorithm::RsaSha512);
        let signed = signer.sign(&sample_document(), "r1").unwrap();

        let signature = crate::xml::extract_element(&signed, "Signature").unwrap();
        XmlVerifier::new(cert_der())
            .verify(&signed, signature, "r1")
            .unwrap();
    }
}
