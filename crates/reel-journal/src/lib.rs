//! Reel Journal - Time-travel debug logs
//!
//! This crate records runner events as JSON Lines and reads them back:
//!
//! - **Dictionary**: incremental string interning for compressed logs
//! - **LoggingSession**: streaming writer; every model is stored as a diff
//!   against the previous one
//! - **LogReader**: decodes (and decompresses) a log into entries
//! - **Replayer**: rebuilds the model after every transition
//!
//! # Example
//!
//! ```
//! use reel_journal::{LoggingSession, Replayer};
//! use serde_json::json;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let path = std::env::temp_dir().join("reel-journal-doc.jsonl");
//! let mut session = LoggingSession::new(File::create(&path).unwrap(), true);
//! session.emit_init(&json!({"count": 0}), &[] as &[u8]).unwrap();
//! session.emit_update(&json!("Increment"), &json!({"count": 1}), &[] as &[u8]).unwrap();
//!
//! let replayer = Replayer::from_reader(BufReader::new(File::open(&path).unwrap())).unwrap();
//! assert_eq!(replayer.model_at(1), Some(&json!({"count": 1}).into()));
//! ```

mod config;
mod dictionary;
mod error;
mod reader;
mod replayer;
mod session;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::LogConfig;
pub use dictionary::{parse_reference, reference_token, Dictionary};
pub use error::{Error, Result};
pub use reader::{LogEntry, LogReader};
pub use replayer::{Frame, Replayer, SubscriptionEvent};
pub use session::{system_millis, LoggingSession, COMPRESSION_SCHEME, LOG_VERSION};
