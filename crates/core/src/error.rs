//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid attributes: {0}")]
    InvalidAttributes(String),

    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    #[error("invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    #[error("invalid compression: {0}")]
    InvalidCompression(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
