//! Reel Core - Canonical value tree and structural diffs
//!
//! This crate provides the common currency of the reel runtime:
//! - `Value` / `ValueMap`: a closed JSON-like tree every model, message,
//!   and effect is reduced to before it is logged
//! - `diff`: index-positional structural diff producing JSON-Pointer
//!   addressed `DiffOp`s
//! - `apply`: replays a list of `DiffOp`s onto a tree (time travel)
//!
//! Domain types enter the tree through serde:
//!
//! ```
//! use reel_core::{diff, DiffOp, Value};
//!
//! #[derive(serde::Serialize)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! let before = Value::from_serialize(&Counter { count: 0 }).unwrap();
//! let after = Value::from_serialize(&Counter { count: 5 }).unwrap();
//!
//! assert_eq!(
//!     diff(&before, &after),
//!     vec![DiffOp::Replace { path: "/count".into(), value: Value::Int(5) }]
//! );
//! ```

pub mod diff;
mod error;
mod value;

pub use diff::{apply, diff, escape_token, unescape_token, DiffOp};
pub use error::{Error, Result};
pub use value::{Value, ValueMap};
