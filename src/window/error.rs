use thiserror::Error;

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Request window errors.
///
/// All of these are recovered locally: ingress is fire-and-forget and
/// failures surface through the event stream or a silent drop.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Malformed request payload: {0}")]
    Decode(String),

    #[error("Request already expired: {0}")]
    Expired(String),

    #[error("Request expires too soon to process: {0}")]
    TooLate(String),
}
