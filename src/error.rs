//! Quorumd Error Types

use thiserror::Error;

/// Result type alias for quorumd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Quorumd error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Wire codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Lifecycle errors
    #[error("Shutdown in progress")]
    ShuttingDown,
}
