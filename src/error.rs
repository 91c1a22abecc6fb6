//! Error types for liveview-core.

use thiserror::Error;

/// Main error type for all liveview-core operations.
///
/// Malformed stream data never surfaces here: corruption, truncation and
/// staleness are internal discard-and-continue transitions inside
/// [`FrameExtractor`](crate::FrameExtractor). The fallible surface is
/// deliberately small.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while loading a file-backed config source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error while loading a file-backed config source.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subscriber registry is at capacity; registration is refused.
    #[error("subscriber limit reached ({limit})")]
    SubscriberCapacity {
        /// The configured registry bound.
        limit: usize,
    },
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
