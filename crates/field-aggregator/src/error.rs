//! Error types for archive aggregation.

use thiserror::Error;

/// Errors raised while turning one archive into region rows.
#[derive(Error, Debug)]
pub enum AggregateError {
    /// Network failure or non-success status from the archive service.
    #[error("fetch failed for {url}: {message}")]
    TransientFetch { url: String, message: String },

    /// Archive is empty, malformed, or does not match the grid.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Local disk failure while writing the decompressed archive.
    #[error("staging failed: {0}")]
    Staging(#[source] std::io::Error),

    #[error("aggregation task failed: {0}")]
    Task(String),
}

impl AggregateError {
    /// Whether retrying the same unit can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
