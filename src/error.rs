//! Error types for tether

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("No connection target known")]
    MissingTarget,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Session closed: {0}")]
    Closed(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TetherError>;
