//! Enveloped XML signature creation.

use crate::codec;
use crate::error::{SpError, SpResult};
use crate::metadata::KeyEntry;
use crate::types::transform_algorithms;
use crate::xml;

use super::{build_signed_info, DigestMethod, SignatureAlgorithm};

/// Signs SAML documents with an enveloped `ds:Signature`.
///
/// The signature lands inside the referenced element, after its Issuer
/// child when one exists (schema placement), with a single Reference using
/// the enveloped-signature and exclusive-canonicalization transforms.
pub struct XmlSigner {
    private_key_der: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
    algorithm: SignatureAlgorithm,
    digest: DigestMethod,
    include_key_info: bool,
}

impl XmlSigner {
    /// Creates a signer from DER key material.
    #[must_use]
    pub fn new(private_key_der: Vec<u8>, certificate_der: Option<Vec<u8>>) -> Self {
        Self {
            private_key_der,
            certificate_der,
            algorithm: SignatureAlgorithm::default(),
            digest: DigestMethod::default(),
            include_key_info: true,
        }
    }

    /// Creates a signer from a key store entry.
    #[must_use]
    pub fn from_key_entry(entry: &KeyEntry) -> Self {
        Self::new(
            entry.private_key_der.clone(),
            Some(entry.certificate_der.clone()),
        )
    }

    /// Sets the signature algorithm.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the digest method.
    #[must_use]
    pub const fn with_digest(mut self, digest: DigestMethod) -> Self {
        self.digest = digest;
        self
    }

    /// Controls whether the certificate is embedded in KeyInfo.
    #[must_use]
    pub const fn include_key_info(mut self, include: bool) -> Self {
        self.include_key_info = include;
        self
    }

    /// Signs the element carrying `ID="<reference_id>"` and returns the
    /// document with the signature spliced in.
    pub fn sign(&self, document: &str, reference_id: &str) -> SpResult<String> {
        let (element_start, element_end) = xml::element_span_by_id(document, reference_id)
            .ok_or_else(|| {
                SpError::Configuration(format!(
                    "element with ID '{reference_id}' not found for signing"
                ))
            })?;
        let element = &document[element_start..element_end];

        // Digest the element as it stands; verification removes the
        // enveloped signature before digesting, restoring this exact text.
        let canonical = xml::canonicalize(element);
        let digest = self.digest.algorithm().digest(canonical.as_bytes());
        let digest_b64 = codec::base64_encode(&digest);

        let signed_info = build_signed_info(
            &format!("#{reference_id}"),
            &digest_b64,
            self.algorithm.uri(),
            transform_algorithms::EXCLUSIVE_C14N,
            self.digest.uri(),
            &[
                transform_algorithms::ENVELOPED_SIGNATURE,
                transform_algorithms::EXCLUSIVE_C14N,
            ],
        );

        let canonical_signed_info = xml::canonicalize(&signed_info);
        let signature_value =
            sp_crypto::rsa_sign(&self.private_key_der, canonical_signed_info.as_bytes(), self.algorithm.rsa())?;
        let signature_b64 = codec::base64_encode(&signature_value);

        let signature_element = self.signature_element(&signed_info, &signature_b64);

        let insert_at = insert_position(document, element_start, element_end)?;
        Ok(format!(
            "{}{}{}",
            &document[..insert_at],
            signature_element,
            &document[insert_at..]
        ))
    }

    fn signature_element(&self, signed_info: &str, signature_b64: &str) -> String {
        let mut signature = format!(
            "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">\n{signed_info}\n<ds:SignatureValue>{signature_b64}</ds:SignatureValue>"
        );

        if self.include_key_info {
            if let Some(cert) = &self.certificate_der {
                let cert_b64 = codec::base64_encode(cert);
                signature.push_str(&format!(
                    "\n<ds:KeyInfo>\n<ds:X509Data>\n<ds:X509Certificate>{cert_b64}</ds:X509Certificate>\n</ds:X509Data>\n</ds:KeyInfo>"
                ));
            }
        }

        signature.push_str("\n</ds:Signature>");
        signature
    }
}

/// The signature goes after the element's Issuer child when present,
/// otherwise directly after the opening tag.
fn insert_position(document: &str, element_start: usize, element_end: usize) -> SpResult<usize> {
    let open_end = document[element_start..]
        .find('>')
        .map(|p| element_start + p + 1)
        .ok_or_else(|| SpError::Configuration("malformed element for signing".to_string()))?;

    if let Some(issuer_start) = xml::find_element_from(document, "Issuer", open_end) {
        if issuer_start < element_end {
            if let Some(issuer) = xml::extract_element_at(document, issuer_start) {
                return Ok(issuer_start + issuer.len());
            }
        }
    }
    Ok(open_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reference_element_fails() {
        let signer = XmlSigner::new(vec![1, 2, 3], None);
        let err = signer.sign("<samlp:AuthnRequest ID=\"a\"/>", "other").unwrap_err();
        assert!(matches!(err, SpError::Configuration(_)));
    }

    #[test]
    fn insert_position_prefers_issuer_end() {
        let doc = r#"<samlp:Response ID="r1"><saml:Issuer>idp</saml:Issuer><samlp:Status/></samlp:Response>"#;
        let (start, end) = xml::element_span_by_id(doc, "r1").unwrap();
        let pos = insert_position(doc, start, end).unwrap();
        assert_eq!(&doc[..pos], r#"<samlp:Response ID="r1"><saml:Issuer>idp</saml:Issuer>"#);
    }

    #[test]
    fn insert_position_falls_back_to_open_tag() {
        let doc = r#"<samlp:Status ID="s1"><samlp:StatusCode/></samlp:Status>"#;
        let (start, end) = xml::element_span_by_id(doc, "s1").unwrap();
        let pos = insert_position(doc, start, end).unwrap();
        assert_eq!(&doc[..pos], r#"<samlp:Status ID="s1">"#);
    }
}
