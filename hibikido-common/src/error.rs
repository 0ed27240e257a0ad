//! Common error types for Hibikidō

use thiserror::Error;

/// Common result type for Hibikidō operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the store, configuration and server layers
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
