//! Encoding pipeline primitives.
//!
//! Base64, raw DEFLATE (no zlib header, per SAML Bindings 3.4.4.1), URL
//! percent-encoding, and the SOAP envelope wrap/unwrap used by the artifact
//! and SOAP logout back channels.

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{SpError, SpResult};
use crate::types::SOAP_NS;
use crate::xml;

/// Base64-encodes bytes with the standard alphabet.
#[must_use]
pub fn base64_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decodes standard-alphabet base64.
pub fn base64_decode(data: &str) -> SpResult<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// Percent-encodes a query parameter value.
#[must_use]
pub fn url_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Decodes a percent-encoded query parameter value.
pub fn url_decode(value: &str) -> SpResult<String> {
    Ok(urlencoding::decode(value)
        .map_err(|e| SpError::MalformedMessage(format!("URL decode error: {e}")))?
        .into_owned())
}

/// Compresses data using raw DEFLATE (no zlib header).
pub fn deflate(data: &[u8]) -> SpResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses raw DEFLATE data. Empty input is a protocol error.
pub fn inflate(data: &[u8]) -> SpResult<Vec<u8>> {
    if data.is_empty() {
        return Err(SpError::MalformedMessage(
            "empty message payload".to_string(),
        ));
    }
    let mut decoder = DeflateDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// The HTTP-Redirect pipeline: DEFLATE, base64, URL-encode.
pub fn compress_base64_url_encode(xml: &str) -> SpResult<String> {
    let compressed = deflate(xml.as_bytes())?;
    Ok(url_encode(&base64_encode(compressed)))
}

/// Inverse of [`compress_base64_url_encode`].
///
/// Web frameworks often hand the parameter over already URL-decoded, so the
/// URL-decode step tolerates both forms.
pub fn url_decode_base64_inflate(value: &str) -> SpResult<String> {
    let url_decoded = url_decode(value)?;
    let compressed = base64_decode(&url_decoded)?;
    let bytes = inflate(&compressed)?;
    String::from_utf8(bytes)
        .map_err(|e| SpError::MalformedMessage(format!("invalid UTF-8 in message: {e}")))
}

/// Decodes a base64 message into its XML text (HTTP-POST pipeline).
pub fn base64_decode_to_string(value: &str) -> SpResult<String> {
    let bytes = base64_decode(value)?;
    String::from_utf8(bytes)
        .map_err(|e| SpError::MalformedMessage(format!("invalid UTF-8 in message: {e}")))
}

/// Wraps an XML fragment in a SOAP 1.1 envelope.
#[must_use]
pub fn soap_wrap(body: &str) -> String {
    format!(
        r#"<soap-env:Envelope xmlns:soap-env="{SOAP_NS}"><soap-env:Body>{body}</soap-env:Body></soap-env:Envelope>"#
    )
}

/// Extracts the single element child of `Envelope/Body` with the given
/// local name. A missing body or child is a protocol error.
pub fn soap_body_child(envelope: &str, local: &str) -> SpResult<String> {
    let body_start = xml::find_element(envelope, "Body")
        .ok_or_else(|| SpError::MalformedMessage("SOAP envelope has no Body".to_string()))?;
    let body = xml::extract_element_at(envelope, body_start)
        .ok_or_else(|| SpError::MalformedMessage("unterminated SOAP Body".to_string()))?;
    xml::extract_element_from(body, local, 1)
        .map(ToString::to_string)
        .ok_or_else(|| {
            SpError::MalformedMessage(format!("SOAP Body carries no {local} element"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_roundtrip() {
        let original = b"Test data for compression";
        let compressed = deflate(original).unwrap();
        let decompressed = inflate(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn inflate_rejects_empty_input() {
        let err = inflate(&[]).unwrap_err();
        assert!(matches!(err, SpError::MalformedMessage(_)));
    }

    #[test]
    fn redirect_pipeline_roundtrip() {
        let xml = r#"<samlp:AuthnRequest ID="a1">payload</samlp:AuthnRequest>"#;
        let encoded = compress_base64_url_encode(xml).unwrap();
        assert_ne!(encoded, xml);
        let decoded = url_decode_base64_inflate(&encoded).unwrap();
        assert_eq!(decoded, xml);
    }

    #[test]
    fn redirect_pipeline_accepts_predecoded_param() {
        let xml = "<LogoutRequest/>";
        let encoded = compress_base64_url_encode(xml).unwrap();
        let pre_decoded = url_decode(&encoded).unwrap();
        assert_eq!(url_decode_base64_inflate(&pre_decoded).unwrap(), xml);
    }

    #[test]
    fn soap_wrap_unwrap() {
        let body = r#"<samlp:ArtifactResolve ID="x"><saml:Issuer>sp</saml:Issuer></samlp:ArtifactResolve>"#;
        let envelope = soap_wrap(body);
        assert!(envelope.contains("http://schemas.xmlsoap.org/soap/envelope/"));
        let child = soap_body_child(&envelope, "ArtifactResolve").unwrap();
        assert_eq!(child, body);
    }

    #[test]
    fn soap_missing_child_is_error() {
        let envelope = soap_wrap("");
        let err = soap_body_child(&envelope, "ArtifactResponse").unwrap_err();
        assert!(matches!(err, SpError::MalformedMessage(_)));
    }
}
