//! Error taxonomy for the tally client

use tally_wire::WireError;

use crate::transform::TransformError;
use crate::transport::TransportError;

/// Errors surfaced by the client, the case aggregate and the runner
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid, conflicting or missing options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A captured value could not be converted
    #[error("serialization error: {0}")]
    Serialization(#[from] TransformError),

    /// Array-append or hit-count against an incompatible existing key
    #[error("type conflict for key `{key}`: {reason}")]
    TypeConflict { key: String, reason: String },

    /// The server rejected the API key or the request's credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server answered a submission with a non-success status
    #[error("submission failed: {0}")]
    Submission(String),

    /// A server operation was attempted while unconfigured or offline
    #[error("client is not configured for {0}")]
    NotConfigured(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn type_conflict(key: &str, reason: impl Into<String>) -> Self {
        Error::TypeConflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
