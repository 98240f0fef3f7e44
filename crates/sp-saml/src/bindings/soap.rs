//! SOAP binding back channel.
//!
//! Synchronous (from the protocol's point of view) HTTPS POSTs to the IdP
//! for artifact resolution and SOAP logout. Auto-redirects are disabled:
//! a redirecting artifact resolution endpoint is a misconfiguration, not
//! something to follow.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::error::{SpError, SpResult};

/// Default back-channel timeout.
pub const DEFAULT_BACK_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard ceiling on the back-channel timeout.
pub const MAX_BACK_CHANNEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared HTTP client for SOAP exchanges with IdPs.
#[derive(Debug, Clone)]
pub struct BackChannel {
    client: reqwest::Client,
    timeout: Duration,
}

impl BackChannel {
    /// Creates a back channel with the given timeout, clamped to the
    /// 120-second ceiling.
    pub fn new(timeout: Duration) -> SpResult<Self> {
        let timeout = timeout.min(MAX_BACK_CHANNEL_TIMEOUT);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| SpError::BackChannel(format!("client construction failed: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// The effective per-exchange timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wraps `body` in a SOAP envelope, POSTs it to `url` as `text/xml`,
    /// and returns the response body.
    ///
    /// Cancellation through `cancel` raises [`SpError::Cancelled`] without
    /// any further side effects; pending correlation entries age out via
    /// their TTL.
    pub async fn exchange(
        &self,
        url: &str,
        body: &str,
        cancel: Option<&CancellationToken>,
    ) -> SpResult<String> {
        let envelope = codec::soap_wrap(body);
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(envelope);

        let response = match cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => return Err(SpError::Cancelled),
                    result = request.send() => result?,
                }
            }
            None => request.send().await?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SpError::BackChannel(format!(
                "IdP returned HTTP {status} from {url}"
            )));
        }

        let text = match cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => return Err(SpError::Cancelled),
                    result = response.text() => result?,
                }
            }
            None => response.text().await?,
        };

        tracing::debug!(url, bytes = text.len(), "SOAP exchange completed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_clamped_to_ceiling() {
        let channel = BackChannel::new(Duration::from_secs(600)).unwrap();
        assert_eq!(channel.timeout(), MAX_BACK_CHANNEL_TIMEOUT);
    }

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let channel = BackChannel::new(DEFAULT_BACK_CHANNEL_TIMEOUT).unwrap();
        assert_eq!(channel.timeout(), DEFAULT_BACK_CHANNEL_TIMEOUT);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_exchange() {
        let channel = BackChannel::new(DEFAULT_BACK_CHANNEL_TIMEOUT).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = channel
            .exchange("http://192.0.2.1/soap", "<x/>", Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, SpError::Cancelled));
    }
}
