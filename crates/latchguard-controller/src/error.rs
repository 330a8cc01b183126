//! Error types for the Latchguard controller

use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors that can occur in the controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] latchguard_core::Error),

    /// Administrative operation rejected
    #[error("Admin error: {0}")]
    Admin(#[from] latchguard_core::AdminError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ControllerError {
    fn from(e: serde_json::Error) -> Self {
        ControllerError::Serialization(e.to_string())
    }
}
