//! Error types and handling for vanishdht

use thiserror::Error;

/// Result type alias for vanishdht operations
pub type Result<T> = std::result::Result<T, Error>;

/// vanishdht error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Insufficient shares: {0}")]
    InsufficientShares(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}
