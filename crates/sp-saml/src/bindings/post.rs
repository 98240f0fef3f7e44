//! HTTP-POST binding.
//!
//! Outbound messages become an auto-submitting HTML form with the base64
//! message in a hidden field; inbound messages are base64 form parameters.

use crate::codec;
use crate::error::{SpError, SpResult};

use super::{DecodedMessage, SamlMessageType};

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes a SAML request as an auto-submitting HTML form.
    #[must_use]
    pub fn encode_request(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Request)
    }

    /// Encodes a SAML response as an auto-submitting HTML form.
    #[must_use]
    pub fn encode_response(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Response)
    }

    fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> String {
        let encoded = codec::base64_encode(xml);
        let param_name = message_type.form_param();

        let relay_state_input = relay_state
            .map(|rs| {
                format!(
                    r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                    html_escape(rs)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            html_escape(destination),
            param_name,
            encoded,
            relay_state_input
        )
    }

    /// Decodes a SAML message from HTTP-POST form parameters.
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

        let xml = codec::base64_decode_to_string(encoded)?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
        })
    }
}

/// Escapes HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_request() {
        let xml = r#"<samlp:AuthnRequest>test</samlp:AuthnRequest>"#;
        let html =
            HttpPostBinding::encode_request(xml, "https://idp.example.org/sso", Some("state123"));

        assert!(html.contains("SAMLRequest"));
        assert!(html.contains("RelayState"));
        assert!(html.contains(r#"onload="document.forms[0].submit()""#));
        assert!(html.contains("https://idp.example.org/sso"));

        let start = html.find("name=\"SAMLRequest\" value=\"").unwrap() + 26;
        let end = html[start..].find('"').unwrap();
        let encoded = &html[start..start + end];

        let decoded = HttpPostBinding::decode(Some(encoded), None, Some("state123")).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.relay_state.as_deref(), Some("state123"));
    }

    #[test]
    fn relay_state_is_attribute_encoded() {
        let html = HttpPostBinding::encode_request(
            "<x/>",
            "https://idp.example.org/sso",
            Some(r#"https://sp.example.org/home?a="b""#),
        );
        assert!(html.contains("&quot;b&quot;"));
        assert!(!html.contains(r#"value="https://sp.example.org/home?a="b"""#));
    }

    #[test]
    fn decode_missing_message() {
        assert!(HttpPostBinding::decode(None, None, None).is_err());
    }
}
