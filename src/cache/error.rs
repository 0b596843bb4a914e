use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache capacity exceeded ({0} entries)")]
    CapacityExceeded(usize),

    #[error("Entry already expired: {0}")]
    Expired(String),
}
