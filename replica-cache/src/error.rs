//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// None of these reach the client: the filter logs them and falls back to
/// the uncached path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Snapshot requested before the intercepted response was finalized
    #[error("Response is not finalized; call flush_buffer before materializing")]
    Incomplete,

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background expiry task could not be started
    #[error("Reaper error: {0}")]
    Reaper(String),
}
