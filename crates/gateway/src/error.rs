//! Gateway error types.

use thiserror::Error;

/// Failure raised while handling one inbound frame.
///
/// The dispatcher converts every variant into an `["error", …]` frame for
/// the originating session; none of them tear the session down.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The frame was not valid JSON at all.
    #[error("invalid json string")]
    Parse(#[from] serde_json::Error),

    /// The frame was valid JSON of the wrong shape for the action.
    #[error("{0}")]
    Shape(String),

    /// Handler-level failure, carried back to the client verbatim
    /// (unknown account, permission violation, unknown algo name, …).
    #[error("{0}")]
    Domain(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
