//! Error types for reel-runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the runner
///
/// Panics raised by platform or program callbacks are not represented here;
/// they unwind through [`crate::Runner::step`] to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Writing the debug log failed
    #[error("journal error: {0}")]
    Journal(#[from] reel_journal::Error),

    /// The OS refused to start a thread for an async effect
    #[error("failed to spawn effect thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A callback panicked mid-phase and took runner, program or handler state with it
    #[error("runner state lost: a callback panicked during an earlier step")]
    Poisoned,
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
// This function is never called but will fail to compile if the bound is not satisfied.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
