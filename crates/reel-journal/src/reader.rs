//! Decode JSON Lines debug logs back into entries

use crate::dictionary::parse_reference;
use crate::session::{COMPRESSION_SCHEME, LOG_VERSION};
use crate::{Error, Result};
use reel_core::{DiffOp, Value};
use std::collections::HashMap;
use std::io::BufRead;

/// One decoded runner event
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// The program was initialized
    Init {
        timestamp: i64,
        model_diff: Vec<DiffOp>,
        effects: Vec<Value>,
    },
    /// One message was processed
    Update {
        timestamp: i64,
        message: Value,
        model_diff: Vec<DiffOp>,
        effects: Vec<Value>,
    },
    /// Subscriptions were started or stopped
    SubscriptionChange {
        timestamp: i64,
        started: Vec<Value>,
        stopped: Vec<Value>,
    },
}

impl LogEntry {
    /// When the event was recorded
    pub fn timestamp(&self) -> i64 {
        match self {
            LogEntry::Init { timestamp, .. }
            | LogEntry::Update { timestamp, .. }
            | LogEntry::SubscriptionChange { timestamp, .. } => *timestamp,
        }
    }

    /// The model diff carried by init and update entries
    pub fn model_diff(&self) -> Option<&[DiffOp]> {
        match self {
            LogEntry::Init { model_diff, .. } | LogEntry::Update { model_diff, .. } => {
                Some(model_diff)
            }
            LogEntry::SubscriptionChange { .. } => None,
        }
    }
}

/// Streaming decoder for logs written by [`crate::LoggingSession`]
///
/// Header and `stringDict` lines are consumed internally; the iterator only
/// yields runner events.
pub struct LogReader<R> {
    source: R,
    line_no: usize,
    compressed: bool,
    strings: HashMap<u64, String>,
}

impl<R: BufRead> LogReader<R> {
    /// Wrap a buffered source
    pub fn new(source: R) -> Self {
        Self {
            source,
            line_no: 0,
            compressed: false,
            strings: HashMap::new(),
        }
    }

    /// Whether a compression header has been seen
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Read every remaining entry
    pub fn read_all(self) -> Result<Vec<LogEntry>> {
        self.collect()
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::Malformed {
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            if self.source.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_line(&mut self, line: &str) -> Result<Option<LogEntry>> {
        let json: serde_json::Value =
            serde_json::from_str(line).map_err(|e| self.malformed(e.to_string()))?;
        let kind = json
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| self.malformed("missing \"type\""))?;

        match kind {
            "header" => {
                let version = json.get("version").and_then(|v| v.as_u64());
                let scheme = json.get("compression").and_then(|c| c.as_str());
                if version != Some(LOG_VERSION) || scheme != Some(COMPRESSION_SCHEME) {
                    return Err(self.malformed(format!("unsupported header {}", json)));
                }
                self.compressed = true;
                Ok(None)
            }
            "stringDict" => {
                let strings = json
                    .get("strings")
                    .and_then(|s| s.as_object())
                    .ok_or_else(|| self.malformed("stringDict without \"strings\""))?;
                for (id, s) in strings {
                    let id: u64 = id
                        .parse()
                        .map_err(|_| self.malformed(format!("bad string id {:?}", id)))?;
                    let s = s
                        .as_str()
                        .ok_or_else(|| self.malformed(format!("string {} is not a string", id)))?;
                    self.strings.insert(id, s.to_string());
                }
                Ok(None)
            }
            "init" => Ok(Some(LogEntry::Init {
                timestamp: self.timestamp(&json)?,
                model_diff: self.model_diff(&json)?,
                effects: self.values(&json, "effects")?,
            })),
            "update" => Ok(Some(LogEntry::Update {
                timestamp: self.timestamp(&json)?,
                message: self.value(&json, "message")?,
                model_diff: self.model_diff(&json)?,
                effects: self.values(&json, "effects")?,
            })),
            "subscriptionChange" => Ok(Some(LogEntry::SubscriptionChange {
                timestamp: self.timestamp(&json)?,
                started: self.values(&json, "started")?,
                stopped: self.values(&json, "stopped")?,
            })),
            other => Err(self.malformed(format!("unknown entry type {:?}", other))),
        }
    }

    fn timestamp(&self, json: &serde_json::Value) -> Result<i64> {
        json.get("timestamp")
            .and_then(|t| t.as_i64())
            .ok_or_else(|| self.malformed("missing integer \"timestamp\""))
    }

    fn field<'j>(&self, json: &'j serde_json::Value, name: &str) -> Result<&'j serde_json::Value> {
        json.get(name)
            .ok_or_else(|| self.malformed(format!("missing {:?}", name)))
    }

    fn value(&self, json: &serde_json::Value, name: &str) -> Result<Value> {
        let raw = self.field(json, name)?;
        self.expand(Value::from(raw.clone()))
    }

    fn values(&self, json: &serde_json::Value, name: &str) -> Result<Vec<Value>> {
        let items = self
            .field(json, name)?
            .as_array()
            .ok_or_else(|| self.malformed(format!("{:?} is not an array", name)))?;
        items
            .iter()
            .map(|item| self.expand(Value::from(item.clone())))
            .collect()
    }

    fn model_diff(&self, json: &serde_json::Value) -> Result<Vec<DiffOp>> {
        let ops = self
            .field(json, "modelDiff")?
            .as_array()
            .ok_or_else(|| self.malformed("\"modelDiff\" is not an array"))?;
        ops.iter()
            .map(|op| {
                let op: DiffOp = serde_json::from_value(op.clone())
                    .map_err(|e| self.malformed(format!("bad diff op: {}", e)))?;
                Ok(match op {
                    DiffOp::Add { path, value } => DiffOp::Add {
                        path,
                        value: self.expand(value)?,
                    },
                    DiffOp::Replace { path, value } => DiffOp::Replace {
                        path,
                        value: self.expand(value)?,
                    },
                    remove @ DiffOp::Remove { .. } => remove,
                })
            })
            .collect()
    }

    /// Resolve `@<id>` tokens in a compressed payload value
    fn expand(&self, value: Value) -> Result<Value> {
        if !self.compressed {
            return Ok(value);
        }
        value.try_map_strings(&mut |token| {
            let id = parse_reference(token)
                .ok_or_else(|| self.malformed(format!("expected reference, got {:?}", token)))?;
            self.strings
                .get(&id)
                .cloned()
                .ok_or(Error::UnknownReference(id))
        })
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            match self.decode_line(&line) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
