use thiserror::Error;

/// Result type for overlay operations
pub type OverlayResult<T> = Result<T, OverlayError>;

/// Overlay-specific errors
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Transport not started")]
    TransportNotReady,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
