use crate::overlay::OverlayError;
use thiserror::Error;

/// Result type for role construction and operations
pub type RoleResult<T> = Result<T, RoleError>;

/// Role wiring errors
#[derive(Debug, Error)]
pub enum RoleError {
    /// Missing required configuration; fatal at construction,
    /// never silently defaulted
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RoleError {
    fn from(err: serde_json::Error) -> Self {
        RoleError::Serialization(err.to_string())
    }
}
