//! Error types for reel-journal

use thiserror::Error;

/// Journal error type
#[derive(Debug, Error)]
pub enum Error {
    /// The log sink rejected a write
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The session was used out of order
    #[error("Logging session not initialized: {0}")]
    NotInitialized(&'static str),

    /// A log line could not be decoded
    #[error("Malformed log line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// A compressed line referenced a string that was never defined
    #[error("Unknown string reference: @{0}")]
    UnknownReference(u64),

    /// Configuration could not be parsed
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// Value tree error
    #[error("Core error: {0}")]
    Core(#[from] reel_core::Error),
}

/// Result type for journal operations
pub type Result<T> = std::result::Result<T, Error>;

// Compile-time check that Error is Send + Sync so it can cross effect threads.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
