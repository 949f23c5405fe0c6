//! Error types for reel-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid JSON pointer: {0:?}")]
    InvalidPointer(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Index {index} out of bounds (len {len}) at {path}")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("Type error at {path}: expected {expected}, got {got}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        got: &'static str,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
