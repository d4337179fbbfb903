// In crates/config-client/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Client not connected")]
    NotConnected,

    #[error("Invalid configuration key: {0}")]
    InvalidKey(String),

    #[error("Configuration key not found: {0}")]
    NotFound(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Configuration service error: {0}")]
    ServiceError(String),

    #[error("Configuration service timeout")]
    Timeout,

    #[error("Cannot read {actual} value as {wanted}")]
    TypeMismatch {
        wanted: &'static str,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
