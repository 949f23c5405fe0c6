//! Debug log configuration
//!
//! Loaded from RON so it can sit next to the rest of an application's
//! settings:
//!
//! ```
//! use reel_journal::LogConfig;
//!
//! let config = LogConfig::from_ron_str(r#"(path: Some("debug.jsonl"), compression: true)"#).unwrap();
//! assert!(config.compression);
//! assert!(config.is_enabled());
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a debug log stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Where to write the JSON Lines log (`None` disables logging)
    pub path: Option<PathBuf>,
    /// Route strings through the dictionary compressor
    pub compression: bool,
}

impl LogConfig {
    /// Log to `path` without compression
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            compression: false,
        }
    }

    /// Enable or disable string compression
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Whether a log file is configured
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Parse a RON document
    pub fn from_ron_str(content: &str) -> Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }
}
