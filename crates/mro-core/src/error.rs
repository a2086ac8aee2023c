//! Core error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown platform type: {0}")]
    UnknownPlatform(String),

    #[error("Unknown condition type: {0}")]
    UnknownConditionType(String),

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
