// In crates/grpc-clients/src/error.rs

use thiserror::Error;

/// Inter-service communication errors.
///
/// The `Display` strings are part of the caller-visible contract: manager
/// callers branch on the "Service not found" vs "Connection failed" prefixes
/// to decide between a retry and a configuration fix.
#[derive(Error, Debug)]
pub enum Error {
    /// Local fast-fail: the circuit breaker rejected the call.
    #[error("Circuit breaker open")]
    CircuitOpen,

    #[error("Call timeout: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Discovery returned no live instance for the named service.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The target was resolved but could not be reached or was unhealthy.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("gRPC call failed: {0}")]
    Call(String),
}

pub type Result<T> = std::result::Result<T, Error>;
