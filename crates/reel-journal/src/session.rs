//! Streaming time-travel log writer
//!
//! A [`LoggingSession`] turns runner events into JSON Lines. Every model is
//! recorded as a diff against the previously recorded model, so a log can be
//! appended to one line at a time and replayed from the start.
//!
//! With compression enabled the first line is a header, and every object key
//! and string leaf inside a payload is replaced by an `@<id>` token. New ids
//! are defined by a `stringDict` line written right before the first line
//! that uses them.

use crate::config::LogConfig;
use crate::dictionary::{reference_token, Dictionary};
use crate::{Error, Result};
use indexmap::IndexMap;
use reel_core::{diff, DiffOp, Value};
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Log format version written in the compressed header
pub const LOG_VERSION: u64 = 2;

/// Name of the only supported compression scheme
pub const COMPRESSION_SCHEME: &str = "stringDict";

/// Milliseconds since the Unix epoch
pub fn system_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Process-scoped state for one debug log stream
pub struct LoggingSession {
    sink: Box<dyn Write + Send>,
    compression: bool,
    dictionary: Dictionary,
    header_written: bool,
    last_model: Option<Value>,
    clock: Box<dyn Fn() -> i64 + Send>,
    lines_written: u64,
}

impl LoggingSession {
    /// Create a session writing to `sink`
    pub fn new(sink: impl Write + Send + 'static, compression: bool) -> Self {
        Self {
            sink: Box::new(sink),
            compression,
            dictionary: Dictionary::new(),
            header_written: false,
            last_model: None,
            clock: Box::new(system_millis),
            lines_written: 0,
        }
    }

    /// Open the file named by `config`, or return `None` when logging is disabled
    pub fn from_config(config: &LogConfig) -> Result<Option<Self>> {
        let Some(path) = &config.path else {
            return Ok(None);
        };
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), compression = config.compression, "Opened debug log");
        Ok(Some(Self::new(BufWriter::new(file), config.compression)))
    }

    /// Replace the wall clock used for `timestamp` fields
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Whether strings are routed through the dictionary
    pub fn is_compressed(&self) -> bool {
        self.compression
    }

    /// The last recorded model, the baseline for the next update diff
    pub fn last_model(&self) -> Option<&Value> {
        self.last_model.as_ref()
    }

    /// The string dictionary (empty when compression is off)
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Number of lines written so far, including header and dictionary lines
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Write the compressed-format header once
    pub fn write_header_if_needed(&mut self) -> Result<()> {
        if !self.compression || self.header_written {
            return Ok(());
        }
        let header = json!({
            "type": "header",
            "version": LOG_VERSION,
            "compression": COMPRESSION_SCHEME,
        });
        self.write_line(&header)?;
        self.header_written = true;
        Ok(())
    }

    /// Record the initial model and bootstrap effects
    pub fn emit_init<M, E>(&mut self, model: &M, effects: &[E]) -> Result<()>
    where
        M: Serialize + ?Sized,
        E: Serialize,
    {
        let model = Value::from_serialize(model)?;
        let model_diff = self.encode_diff(diff(&Value::empty_object(), &model))?;
        let effects = self.encode_all(effects)?;

        let mut line = self.envelope("init");
        line.insert("modelDiff".into(), model_diff);
        line.insert("effects".into(), effects);
        self.write_event(line)?;

        self.last_model = Some(model);
        Ok(())
    }

    /// Record one processed message and the model it produced
    pub fn emit_update<Msg, M, E>(&mut self, message: &Msg, new_model: &M, effects: &[E]) -> Result<()>
    where
        Msg: Serialize + ?Sized,
        M: Serialize + ?Sized,
        E: Serialize,
    {
        let Some(last_model) = &self.last_model else {
            return Err(Error::NotInitialized("emit_update called before emit_init"));
        };
        let new_model = Value::from_serialize(new_model)?;
        let model_diff = diff(last_model, &new_model);

        let message = self.encode(&Value::from_serialize(message)?)?;
        let model_diff = self.encode_diff(model_diff)?;
        let effects = self.encode_all(effects)?;

        let mut line = self.envelope("update");
        line.insert("message".into(), message);
        line.insert("modelDiff".into(), model_diff);
        line.insert("effects".into(), effects);
        self.write_event(line)?;

        self.last_model = Some(new_model);
        Ok(())
    }

    /// Record subscriptions started and stopped during reconciliation
    pub fn emit_subscription_change<S, I>(&mut self, started: &[S], stopped: &[I]) -> Result<()>
    where
        S: Serialize,
        I: Serialize,
    {
        let started = self.encode_all(started)?;
        let stopped = self.encode_all(stopped)?;

        let mut line = self.envelope("subscriptionChange");
        line.insert("started".into(), started);
        line.insert("stopped".into(), stopped);
        self.write_event(line)
    }

    /// Flush buffered output to the underlying sink
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    fn envelope(&self, kind: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut line = serde_json::Map::new();
        line.insert("type".into(), json!(kind));
        line.insert("timestamp".into(), json!((self.clock)()));
        line
    }

    fn encode(&mut self, value: &Value) -> Result<serde_json::Value> {
        if !self.compression {
            return Ok(value.clone().into());
        }
        let dictionary = &mut self.dictionary;
        let compressed = value.map_strings(&mut |s| reference_token(dictionary.get_reference(s)));
        Ok(compressed.into())
    }

    fn encode_all<T: Serialize>(&mut self, items: &[T]) -> Result<serde_json::Value> {
        let mut encoded = Vec::with_capacity(items.len());
        for item in items {
            encoded.push(self.encode(&Value::from_serialize(item)?)?);
        }
        Ok(serde_json::Value::Array(encoded))
    }

    fn encode_diff(&mut self, ops: Vec<DiffOp>) -> Result<serde_json::Value> {
        let mut encoded = Vec::with_capacity(ops.len());
        for op in ops {
            let op = match op {
                DiffOp::Add { path, value } => {
                    json!({ "op": "add", "path": path, "value": self.encode(&value)? })
                }
                DiffOp::Replace { path, value } => {
                    json!({ "op": "replace", "path": path, "value": self.encode(&value)? })
                }
                DiffOp::Remove { path } => json!({ "op": "remove", "path": path }),
            };
            encoded.push(op);
        }
        Ok(serde_json::Value::Array(encoded))
    }

    fn write_event(&mut self, line: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        self.write_header_if_needed()?;
        if self.dictionary.has_pending() {
            let strings = self.dictionary.flush_pending();
            if let Err(e) = self.write_line(&string_dict_line(&strings)) {
                self.dictionary.restore_pending(strings);
                return Err(e);
            }
        }
        self.write_line(&serde_json::Value::Object(line))
    }

    fn write_line(&mut self, line: &serde_json::Value) -> Result<()> {
        let mut text =
            serde_json::to_string(line).map_err(|e| Error::Serialization(e.to_string()))?;
        text.push('\n');
        let written = self
            .sink
            .write_all(text.as_bytes())
            .and_then(|()| self.sink.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "Debug log write failed");
            return Err(e.into());
        }
        self.lines_written += 1;
        Ok(())
    }
}

fn string_dict_line(strings: &IndexMap<u64, String>) -> serde_json::Value {
    let strings: serde_json::Map<String, serde_json::Value> = strings
        .iter()
        .map(|(id, s)| (id.to_string(), serde_json::Value::String(s.clone())))
        .collect();
    json!({ "type": "stringDict", "strings": strings })
}

impl std::fmt::Debug for LoggingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingSession")
            .field("compression", &self.compression)
            .field("header_written", &self.header_written)
            .field("dictionary_len", &self.dictionary.len())
            .field("lines_written", &self.lines_written)
            .finish()
    }
}
