//! The minimal host contract.
//!
//! The library never touches a web framework directly; the embedding
//! application adapts its server's request/response types to these two
//! traits and passes them into the controller entry points. The
//! correlation cache keys on the opaque `user_bucket` token the host
//! supplies (a session cookie, typically); a host that returns `None`
//! opts out of InResponseTo enforcement.

/// The inbound half of the host contract.
pub trait HostRequest: Send + Sync {
    /// The HTTP method, uppercase.
    fn method(&self) -> &str;

    /// The full request URL as received.
    fn raw_url(&self) -> &str;

    /// A query or form parameter, decoded by the host.
    fn query_param(&self, name: &str) -> Option<String>;

    /// The request body.
    fn body(&self) -> &str;

    /// Opaque per-user token for request correlation.
    fn user_bucket(&self) -> Option<String>;

    /// The raw query string, byte for byte as the peer sent it. Redirect
    /// signature verification depends on this not being re-encoded.
    fn raw_query(&self) -> &str {
        self.raw_url()
            .split_once('?')
            .map_or("", |(_, query)| query)
    }
}

/// The outbound half of the host contract.
pub trait HostResponse: Send {
    /// Issues an HTTP redirect.
    fn redirect(&mut self, url: &str);

    /// Writes a response body with the given content type.
    fn write(&mut self, body: &str, content_type: &str);

    /// Completes the response.
    fn end(&mut self);
}

#[cfg(test)]
mod tests {
    use super::HostRequest;

    struct UrlOnly(&'static str);

    impl HostRequest for UrlOnly {
        fn method(&self) -> &str {
            "GET"
        }

        fn raw_url(&self) -> &str {
            self.0
        }

        fn query_param(&self, _name: &str) -> Option<String> {
            None
        }

        fn body(&self) -> &str {
            ""
        }

        fn user_bucket(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn raw_query_is_sliced_from_url() {
        let request = UrlOnly("https://sp.example.org/acs?SAMLResponse=a%2Bb&RelayState=x");
        assert_eq!(request.raw_query(), "SAMLResponse=a%2Bb&RelayState=x");

        let bare = UrlOnly("https://sp.example.org/acs");
        assert_eq!(bare.raw_query(), "");
    }
}
