//! XML-DSig support: enveloped signing and verification plus the detached
//! query-string signature used by the HTTP-Redirect binding.

mod redirect;
mod signer;
mod verifier;

pub use redirect::RedirectSigner;
pub use signer::XmlSigner;
pub use verifier::XmlVerifier;

use crate::error::{SpError, SpResult};
use crate::types::{digest_algorithms, signature_algorithms, transform_algorithms};
use crate::xml;

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-256 (the negotiated default).
    #[default]
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
    /// Legacy RSA with SHA-1; accepted on verification only.
    RsaSha1,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => signature_algorithms::RSA_SHA256,
            Self::RsaSha384 => signature_algorithms::RSA_SHA384,
            Self::RsaSha512 => signature_algorithms::RSA_SHA512,
            Self::RsaSha1 => signature_algorithms::RSA_SHA1,
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            signature_algorithms::RSA_SHA256 => Some(Self::RsaSha256),
            signature_algorithms::RSA_SHA384 => Some(Self::RsaSha384),
            signature_algorithms::RSA_SHA512 => Some(Self::RsaSha512),
            signature_algorithms::RSA_SHA1 => Some(Self::RsaSha1),
            _ => None,
        }
    }

    /// The underlying RSA primitive.
    #[must_use]
    pub const fn rsa(&self) -> sp_crypto::RsaAlgorithm {
        match self {
            Self::RsaSha256 => sp_crypto::RsaAlgorithm::Rs256,
            Self::RsaSha384 => sp_crypto::RsaAlgorithm::Rs384,
            Self::RsaSha512 => sp_crypto::RsaAlgorithm::Rs512,
            Self::RsaSha1 => sp_crypto::RsaAlgorithm::Rs1,
        }
    }
}

/// Digest method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestMethod {
    /// SHA-1, the interoperability default.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestMethod {
    /// Returns the URI for this digest method.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => digest_algorithms::SHA1,
            Self::Sha256 => digest_algorithms::SHA256,
            Self::Sha384 => digest_algorithms::SHA384,
            Self::Sha512 => digest_algorithms::SHA512,
        }
    }

    /// Parses a digest method from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            digest_algorithms::SHA1 => Some(Self::Sha1),
            digest_algorithms::SHA256 => Some(Self::Sha256),
            digest_algorithms::SHA384 => Some(Self::Sha384),
            digest_algorithms::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// The underlying digest primitive.
    #[must_use]
    pub const fn algorithm(&self) -> sp_crypto::DigestAlgorithm {
        match self {
            Self::Sha1 => sp_crypto::DigestAlgorithm::Sha1,
            Self::Sha256 => sp_crypto::DigestAlgorithm::Sha256,
            Self::Sha384 => sp_crypto::DigestAlgorithm::Sha384,
            Self::Sha512 => sp_crypto::DigestAlgorithm::Sha512,
        }
    }
}

/// Parsed content of a `ds:Signature` element.
#[derive(Debug, Clone)]
pub struct XmlSignatureInfo {
    /// The signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization method URI.
    pub canonicalization: String,
    /// The single Reference URI.
    pub reference_uri: String,
    /// Transform URIs in document order.
    pub transforms: Vec<String>,
    /// The digest method.
    pub digest_method: DigestMethod,
    /// The base64 digest value, whitespace elided.
    pub digest_value: String,
    /// The base64 signature value, whitespace elided.
    pub signature_value: String,
    /// The embedded base64 certificate, whitespace elided.
    pub x509_certificate: Option<String>,
}

/// Extracts the signature fields from a `ds:Signature` element.
pub fn parse_signature(signature_xml: &str) -> SpResult<XmlSignatureInfo> {
    let algorithm = xml::element_attr(signature_xml, "SignatureMethod", "Algorithm")
        .and_then(|uri| SignatureAlgorithm::from_uri(&uri))
        .ok_or_else(|| {
            SpError::SignatureInvalid("missing or unknown signature algorithm".to_string())
        })?;

    let canonicalization = xml::element_attr(signature_xml, "CanonicalizationMethod", "Algorithm")
        .unwrap_or_else(|| transform_algorithms::EXCLUSIVE_C14N.to_string());

    let reference_uri = xml::element_attr(signature_xml, "Reference", "URI")
        .ok_or_else(|| SpError::SignatureInvalid("no Reference URI".to_string()))?;

    let mut transforms = Vec::new();
    let mut from = 0;
    while let Some(pos) = xml::find_element_from(signature_xml, "Transform", from) {
        if let Some(uri) = xml::element_attr_at(signature_xml, pos, "Algorithm") {
            transforms.push(uri);
        }
        from = pos + 1;
    }

    let digest_method = xml::element_attr(signature_xml, "DigestMethod", "Algorithm")
        .and_then(|uri| DigestMethod::from_uri(&uri))
        .ok_or_else(|| {
            SpError::SignatureInvalid("missing or unknown digest method".to_string())
        })?;

    let digest_value = xml::element_text(signature_xml, "DigestValue")
        .ok_or_else(|| SpError::SignatureInvalid("no DigestValue".to_string()))?;
    let signature_value = xml::element_text(signature_xml, "SignatureValue")
        .ok_or_else(|| SpError::SignatureInvalid("no SignatureValue".to_string()))?;

    let strip = |s: String| -> String { s.chars().filter(|c| !c.is_whitespace()).collect() };

    Ok(XmlSignatureInfo {
        algorithm,
        canonicalization,
        reference_uri,
        transforms,
        digest_method,
        digest_value: strip(digest_value),
        signature_value: strip(signature_value),
        x509_certificate: xml::element_text(signature_xml, "X509Certificate").map(strip),
    })
}

/// Builds a SignedInfo element. Shared by the signer and the verifier's
/// rebuild step so both sides canonicalize identical text.
pub(crate) fn build_signed_info(
    reference_uri: &str,
    digest_b64: &str,
    signature_algorithm_uri: &str,
    canonicalization_uri: &str,
    digest_method_uri: &str,
    transforms: &[&str],
) -> String {
    let transforms_xml: String = transforms
        .iter()
        .map(|uri| format!("\n<ds:Transform Algorithm=\"{uri}\"/>"))
        .collect();
    format!(
        r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
<ds:CanonicalizationMethod Algorithm="{canonicalization_uri}"/>
<ds:SignatureMethod Algorithm="{signature_algorithm_uri}"/>
<ds:Reference URI="{reference_uri}">
<ds:Transforms>{transforms_xml}
</ds:Transforms>
<ds:DigestMethod Algorithm="{digest_method_uri}"/>
<ds:DigestValue>{digest_b64}</ds:DigestValue>
</ds:Reference>
</ds:SignedInfo>"#
    )
}

/// Extracts the `SubjectPublicKeyInfo` from an X.509 certificate.
pub(crate) fn public_key_from_certificate(cert_der: &[u8]) -> SpResult<Vec<u8>> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| SpError::SignatureInvalid(format!("unparsable certificate: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_algorithm_uri_roundtrip() {
        for alg in [
            SignatureAlgorithm::RsaSha1,
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()), Some(alg));
        }
    }

    #[test]
    fn digest_method_uri_roundtrip() {
        for method in [
            DigestMethod::Sha1,
            DigestMethod::Sha256,
            DigestMethod::Sha384,
            DigestMethod::Sha512,
        ] {
            assert_eq!(DigestMethod::from_uri(method.uri()), Some(method));
        }
    }

    #[test]
    fn defaults_follow_configuration_contract() {
        assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::RsaSha256);
        assert_eq!(DigestMethod::default(), DigestMethod::Sha1);
    }

    #[test]
    fn parse_signature_extracts_fields() {
        let signed_info = build_signed_info(
            "#abc",
            "ZGlnZXN0",
            SignatureAlgorithm::RsaSha256.uri(),
            crate::types::transform_algorithms::EXCLUSIVE_C14N,
            DigestMethod::Sha1.uri(),
            &[
                crate::types::transform_algorithms::ENVELOPED_SIGNATURE,
                crate::types::transform_algorithms::EXCLUSIVE_C14N,
            ],
        );
        let signature_xml = format!(
            "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">{signed_info}<ds:SignatureValue>c2ln\n bmF0dXJl</ds:SignatureValue></ds:Signature>"
        );

        let info = parse_signature(&signature_xml).unwrap();
        assert_eq!(info.algorithm, SignatureAlgorithm::RsaSha256);
        assert_eq!(info.reference_uri, "#abc");
        assert_eq!(info.transforms.len(), 2);
        assert_eq!(info.digest_method, DigestMethod::Sha1);
        assert_eq!(info.digest_value, "ZGlnZXN0");
        assert_eq!(info.signature_value, "c2lnbmF0dXJl");
        assert!(info.x509_certificate.is_none());
    }

    #[test]
    fn parse_signature_rejects_unknown_algorithm() {
        let signature_xml = r#"<ds:Signature><ds:SignatureMethod Algorithm="urn:bogus"/></ds:Signature>"#;
        assert!(matches!(
            parse_signature(signature_xml).unwrap_err(),
            SpError::SignatureInvalid(_)
        ));
    }
}
