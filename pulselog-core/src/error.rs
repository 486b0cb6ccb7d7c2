//! Error types for pulselog-core

use thiserror::Error;

/// Main error type for the pulselog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client construction or health-check error
    #[error("http error: {0}")]
    Http(String),
}

/// Result type alias for pulselog-core
pub type Result<T> = std::result::Result<T, Error>;

/// Classified failure returned by a [`DeliveryClient`](crate::delivery::DeliveryClient).
///
/// The classification drives the retry loop in the sync coordinator:
/// only [`DeliveryError::Transient`] is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network unreachable, timeout, or a 5xx-class response
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The collector refused the batch (4xx-class validation or auth error)
    #[error("batch rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request could not be built (e.g. a device id that is not a valid header value)
    #[error("invalid delivery request: {0}")]
    InvalidRequest(String),

    /// The flush was cancelled by the caller
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Whether this failure came from caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled)
    }
}
