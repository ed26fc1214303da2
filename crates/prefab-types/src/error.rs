use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    #[error("invalid local id: {0:?}")]
    InvalidLocalId(String),

    #[error("invalid property path {path:?}: {reason}")]
    InvalidPropertyPath { path: String, reason: String },
}
