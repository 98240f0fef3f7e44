//! HTTP-Redirect binding.
//!
//! Messages travel DEFLATE-compressed, base64- and URL-encoded in query
//! parameters. Signatures are detached, computed over the canonical
//! parameter string; verification works on the raw query string so the
//! IdP's percent-encoding is preserved byte for byte.

use crate::codec;
use crate::error::{SpError, SpResult};

use super::{DecodedMessage, SamlMessageType};

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes a SAML request into a redirect URL.
    pub fn encode_request(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SpResult<String> {
        Self::encode(xml, destination, relay_state, SamlMessageType::Request)
    }

    /// Encodes a SAML response into a redirect URL.
    pub fn encode_response(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SpResult<String> {
        Self::encode(xml, destination, relay_state, SamlMessageType::Response)
    }

    fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SpResult<String> {
        let query = Self::canonical_query(xml, relay_state, None, message_type)?;
        let separator = if destination.contains('?') { '&' } else { '?' };
        Ok(format!("{destination}{separator}{query}"))
    }

    /// Encodes a signed SAML message into a redirect URL: the canonical
    /// query (including `SigAlg`) followed by `&Signature=`.
    pub fn encode_signed(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        sig_alg: &str,
        signature_b64: &str,
        message_type: SamlMessageType,
    ) -> SpResult<String> {
        let query = Self::canonical_query(xml, relay_state, Some(sig_alg), message_type)?;
        let separator = if destination.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{destination}{separator}{query}&Signature={}",
            codec::url_encode(signature_b64)
        ))
    }

    /// Builds the canonical signed parameter string:
    /// `SAMLRequest|SAMLResponse`, then `RelayState` when present, then
    /// `SigAlg` when signing. Every value is URL-encoded exactly once.
    pub fn canonical_query(
        xml: &str,
        relay_state: Option<&str>,
        sig_alg: Option<&str>,
        message_type: SamlMessageType,
    ) -> SpResult<String> {
        let mut query = format!(
            "{}={}",
            message_type.form_param(),
            codec::compress_base64_url_encode(xml)?
        );
        if let Some(rs) = relay_state {
            query.push_str(&format!("&RelayState={}", codec::url_encode(rs)));
        }
        if let Some(alg) = sig_alg {
            query.push_str(&format!("&SigAlg={}", codec::url_encode(alg)));
        }
        Ok(query)
    }

    /// Decodes a SAML message from redirect query parameters.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SpResult<DecodedMessage> {
        let (encoded, message_type) = if let Some(req) = saml_request {
            (req, SamlMessageType::Request)
        } else if let Some(resp) = saml_response {
            (resp, SamlMessageType::Response)
        } else {
            return Err(SpError::MalformedMessage(
                "no SAMLRequest or SAMLResponse parameter".to_string(),
            ));
        };

        let xml = codec::url_decode_base64_inflate(encoded)?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
        })
    }

    /// Decodes a message from a full redirect URL.
    pub fn decode_url(url: &str) -> SpResult<DecodedMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SpError::MalformedMessage(format!("invalid URL: {e}")))?;

        let mut saml_request = None;
        let mut saml_response = None;
        let mut relay_state = None;

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "SAMLRequest" => saml_request = Some(value.into_owned()),
                "SAMLResponse" => saml_response = Some(value.into_owned()),
                "RelayState" => relay_state = Some(value.into_owned()),
                _ => {}
            }
        }

        Self::decode(
            saml_request.as_deref(),
            saml_response.as_deref(),
            relay_state.as_deref(),
        )
    }

    /// Splits a raw query string into the signed portion and the signature
    /// value, preserving the sender's encoding byte for byte.
    ///
    /// Returns `(signed_data, signature_percent_encoded)`.
    pub fn split_signed_query(raw_query: &str) -> SpResult<(&str, &str)> {
        let marker = "&Signature=";
        let pos = raw_query
            .rfind(marker)
            .ok_or_else(|| SpError::SignatureMissing("no Signature parameter".to_string()))?;
        let signed = &raw_query[..pos];
        let mut signature = &raw_query[pos + marker.len()..];
        if let Some(amp) = signature.find('&') {
            signature = &signature[..amp];
        }
        if signature.is_empty() {
            return Err(SpError::SignatureMissing("empty Signature parameter".to_string()));
        }
        Ok((signed, signature))
    }

    /// Extracts a raw (still percent-encoded) parameter value from a query
    /// string without touching its bytes.
    #[must_use]
    pub fn raw_query_param<'a>(raw_query: &'a str, name: &str) -> Option<&'a str> {
        let pat = format!("{name}=");
        let mut search = 0;
        while let Some(rel) = raw_query[search..].find(&pat) {
            let abs = search + rel;
            if abs == 0 || raw_query.as_bytes()[abs - 1] == b'&' {
                let start = abs + pat.len();
                let end = raw_query[start..]
                    .find('&')
                    .map_or(raw_query.len(), |p| start + p);
                return Some(&raw_query[start..end]);
            }
            search = abs + pat.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_request() {
        let xml = r#"<samlp:AuthnRequest>test content here</samlp:AuthnRequest>"#;
        let url = HttpRedirectBinding::encode_request(
            xml,
            "https://idp.example.org/sso",
            Some("state123"),
        )
        .unwrap();

        assert!(url.starts_with("https://idp.example.org/sso?"));
        assert!(url.contains("SAMLRequest="));
        assert!(url.contains("RelayState=state123"));

        let decoded = HttpRedirectBinding::decode_url(&url).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.relay_state.as_deref(), Some("state123"));
    }

    #[test]
    fn url_with_existing_query_uses_ampersand() {
        let url = HttpRedirectBinding::encode_request(
            "<Test/>",
            "https://idp.example.org/sso?existing=param",
            None,
        )
        .unwrap();
        assert!(url.contains("?existing=param&SAMLRequest="));
    }

    #[test]
    fn canonical_query_order_is_fixed() {
        let query = HttpRedirectBinding::canonical_query(
            "<Test/>",
            Some("https://sp.example.org/home"),
            Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"),
            SamlMessageType::Response,
        )
        .unwrap();

        let response_pos = query.find("SAMLResponse=").unwrap();
        let relay_pos = query.find("&RelayState=").unwrap();
        let alg_pos = query.find("&SigAlg=").unwrap();
        assert!(response_pos < relay_pos && relay_pos < alg_pos);
        assert!(!query.contains("Signature="));
    }

    #[test]
    fn split_signed_query_preserves_bytes() {
        let raw = "SAMLResponse=abc%2Fdef&RelayState=x%20y&SigAlg=rsa&Signature=c2ln%3D";
        let (signed, sig) = HttpRedirectBinding::split_signed_query(raw).unwrap();
        assert_eq!(signed, "SAMLResponse=abc%2Fdef&RelayState=x%20y&SigAlg=rsa");
        assert_eq!(sig, "c2ln%3D");
    }

    #[test]
    fn split_signed_query_requires_signature() {
        let err = HttpRedirectBinding::split_signed_query("SAMLResponse=abc").unwrap_err();
        assert!(matches!(err, crate::error::SpError::SignatureMissing(_)));
    }

    #[test]
    fn raw_query_param_does_not_decode() {
        let raw = "SAMLRequest=a%2Bb&RelayState=r%26s&SigAlg=alg";
        assert_eq!(
            HttpRedirectBinding::raw_query_param(raw, "SAMLRequest"),
            Some("a%2Bb")
        );
        assert_eq!(
            HttpRedirectBinding::raw_query_param(raw, "RelayState"),
            Some("r%26s")
        );
        assert_eq!(HttpRedirectBinding::raw_query_param(raw, "Signature"), None);
    }
}
