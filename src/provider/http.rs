//! HTTP carrier client (Twilio-compatible messaging API).
//!
//! Posts form-encoded message requests with basic auth and parses the
//! JSON response for the carrier-assigned message sid.

use serde::Deserialize;
use tracing::{debug, warn};

use super::{sanitize_error_body, OutboundProvider, ProviderError};
use crate::config::ProviderConfig;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for send operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Carrier API version path segment.
const API_VERSION: &str = "2010-04-01";

/// Client for a Twilio-compatible messaging HTTP API.
pub struct HttpProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

/// Successful send response envelope.
#[derive(Deserialize)]
struct MessageResponse {
    sid: String,
}

impl HttpProvider {
    /// Build a client from carrier configuration.
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, config }
    }

    /// Whether account credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.config.account_sid.is_empty() && !self.config.auth_token.is_empty()
    }
}

#[async_trait::async_trait]
impl OutboundProvider for HttpProvider {
    async fn send(
        &self,
        to: &str,
        body: &str,
        callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }

        let url = format!(
            "{}/{}/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            API_VERSION,
            self.config.account_sid
        );

        let mut form: Vec<(&str, &str)> = vec![("To", to), ("Body", body)];
        if !self.config.from_number.is_empty() {
            form.push(("From", &self.config.from_number));
        }
        if let Some(callback) = callback_url {
            form.push(("StatusCallback", callback));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                body: sanitize_error_body(&text),
            });
        }

        let parsed: MessageResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Parse(format!("missing message sid: {e}")))?;
        debug!(to, sid = %parsed.sid, "message accepted by carrier");
        Ok(parsed.sid)
    }
}
