//! Error types for homopath discovery.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, HomopaError>;

/// Errors that can occur in core operations.
#[derive(Error, Debug)]
pub enum HomopaError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression error
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Cardinality estimation was given unusable input
    #[error("Estimator error: {0}")]
    Estimator(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
