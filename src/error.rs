//! Error taxonomy for gateway and REST operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for all library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the gateway engine and the REST dispatcher.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed at the transport level
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An HTTP verb string that the dispatcher does not support
    #[error("unsupported HTTP verb `{0}`")]
    BadVerb(String),

    /// A schema descriptor could not encode the supplied value
    #[error("schema cannot encode field `{field}`: {reason}")]
    Schema { field: String, reason: String },

    /// Gateway transport failure outside the WebSocket protocol itself
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway rejected the credential; the session is permanently failed
    #[error("authentication rejected by gateway (close code {code})")]
    Auth { code: u16 },

    /// The gateway rejected the shard descriptor; the session is permanently failed
    #[error("invalid shard configuration (close code {code})")]
    Shard { code: u16 },

    /// The gateway closed with a non-recoverable protocol code
    #[error("gateway refused the connection (close code {code})")]
    Protocol { code: u16 },

    /// The REST call completed with an HTTP status >= 300
    #[error("HTTP status {status}")]
    Status { status: u16, body: String },

    /// Refused by a server-advertised rate-limit record, or a 429 response
    #[error("rate limited, retry in {reset_in:?}")]
    RateLimited { reset_in: Duration },

    /// Refused by the client-side burst guard
    #[error("local rate limit exceeded, retry in {reset_in:?}")]
    LocalRateLimit { reset_in: Duration },

    /// The response body was not valid JSON
    #[error("failed to decode response body (status {status})")]
    Decode { status: u16 },

    /// The session has been disconnected
    #[error("session is closed")]
    Closed,
}

impl Error {
    /// Whether this error permanently fails the session (no reconnect).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Shard { .. } | Self::Protocol { .. }
        )
    }

    /// Suggested wait before retrying, for rate-limit errors.
    #[must_use]
    pub const fn reset_in(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { reset_in } | Self::LocalRateLimit { reset_in } => Some(*reset_in),
            _ => None,
        }
    }
}
