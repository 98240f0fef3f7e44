//! SAML binding implementations.
//!
//! The SP emits requests and consumes responses over three bindings:
//! HTTP-POST (auto-submitting form), HTTP-Redirect (deflated query
//! parameter), and SOAP (back channel for artifact resolution and logout).

mod post;
mod redirect;
mod soap;

pub use post::HttpPostBinding;
pub use redirect::HttpRedirectBinding;
pub use soap::{BackChannel, DEFAULT_BACK_CHANNEL_TIMEOUT, MAX_BACK_CHANNEL_TIMEOUT};

/// Whether a SAML message travels as `SAMLRequest` or `SAMLResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// An AuthnRequest, LogoutRequest, or ArtifactResolve.
    Request,
    /// A Response, LogoutResponse, or ArtifactResponse.
    Response,
}

impl SamlMessageType {
    /// Returns the form/query parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// A SAML message decoded from its transport encoding.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The decoded XML document.
    pub xml: String,
    /// Whether the message arrived as a request or response.
    pub message_type: SamlMessageType,
    /// The RelayState parameter, if present.
    pub relay_state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_param_names() {
        assert_eq!(SamlMessageType::Request.form_param(), "SAMLRequest");
        assert_eq!(SamlMessageType::Response.form_param(), "SAMLResponse");
    }
}
