//! Error types for inventory operations

use thiserror::Error;

/// Inventory bot specific errors
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Malformed command syntax
    #[error("Parse error: {0}")]
    Parse(String),

    /// Zero matches for an operation that needs at least one
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O failure talking to the backing table
    #[error("Remote store error: {0}")]
    RemoteStore(String),

    /// An action arrived with no matching pending session state
    #[error("State error: {0}")]
    State(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        InventoryError::RemoteStore(err.to_string())
    }
}

impl From<serde_json::Error> for InventoryError {
    fn from(err: serde_json::Error) -> Self {
        InventoryError::RemoteStore(format!("malformed response: {err}"))
    }
}

impl From<url::ParseError> for InventoryError {
    fn from(err: url::ParseError) -> Self {
        InventoryError::Config(format!("invalid URL: {err}"))
    }
}

/// Convert anyhow::Error to InventoryError
impl From<anyhow::Error> for InventoryError {
    fn from(err: anyhow::Error) -> Self {
        InventoryError::Other(err.to_string())
    }
}
