// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry record is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Registry record field {field} has invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
