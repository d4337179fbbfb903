// In crates/discovery/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The registry store was unreachable at setup time. Fatal to the caller.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A registration write failed. Fatal to the caller.
    #[error("Service registration failed: {0}")]
    Registration(String),

    /// A discovery read failed.
    #[error("Discovery query failed: {0}")]
    Query(String),

    /// A registry round trip exceeded its deadline.
    #[error("Registry operation timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
