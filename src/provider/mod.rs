//! Outbound carrier abstraction.
//!
//! Defines the [`OutboundProvider`] trait the dispatch worker sends
//! through, and the error taxonomy the retry machinery classifies on.
//! The engine only distinguishes success, transient failure (worth
//! waiting out), and terminal failure — everything else about the
//! carrier is an implementation detail behind the trait.

use async_trait::async_trait;
use thiserror::Error;

pub mod http;

/// Errors returned by outbound providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No carrier credentials are configured.
    #[error("carrier not configured (missing account credentials)")]
    NotConfigured,

    /// HTTP transport failure (connect, timeout, TLS).
    #[error("carrier request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The carrier responded with an error status.
    #[error("carrier returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },

    /// The carrier's response did not match the expected schema.
    #[error("carrier response parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether a retry after a wait is expected to succeed.
    ///
    /// Rate limits and carrier-side server faults qualify; everything
    /// else (bad request, auth, unreachable, unconfigured) is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { status, .. } if *status == 429 || (500..=599).contains(status)
        )
    }
}

/// Largest error-body excerpt kept in recipient records.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Collapse and truncate a carrier error body before persisting it.
pub fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = collapsed
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}

/// Core outbound carrier interface.
///
/// Implementations must be `Send + Sync`: one send call may be in flight
/// per active job, each on its own task.
#[async_trait]
pub trait OutboundProvider: Send + Sync {
    /// Dispatch one message, returning the carrier's message identifier.
    ///
    /// `callback_url`, when present, asks the carrier to post delivery
    /// receipts there as the message progresses.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on configuration, transport, carrier,
    /// or parse failure.
    async fn send(
        &self,
        to: &str,
        body: &str,
        callback_url: Option<&str>,
    ) -> Result<String, ProviderError>;
}
