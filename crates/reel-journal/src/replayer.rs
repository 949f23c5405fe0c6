//! Time-travel over a decoded debug log
//!
//! The replayer folds every model diff onto the previous model, starting from
//! the empty object, and keeps one frame per init/update entry so a debugger
//! can jump to any point in the session.

use crate::reader::{LogEntry, LogReader};
use crate::{Error, Result};
use reel_core::{apply, Value};
use std::io::BufRead;

/// The model as it stood after one logged transition
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Timestamp of the entry that produced this frame
    pub timestamp: i64,
    /// The message that was processed (`None` for the init frame)
    pub message: Option<Value>,
    /// Effects requested by this transition
    pub effects: Vec<Value>,
    /// Full model after the transition
    pub model: Value,
}

/// A subscription change and the frame it followed
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    /// Index of the last frame recorded before the change
    pub after_frame: usize,
    /// Timestamp of the change entry
    pub timestamp: i64,
    /// Descriptors of the subscriptions that were started
    pub started: Vec<Value>,
    /// Ids of the subscriptions that were stopped
    pub stopped: Vec<Value>,
}

/// Cursor over reconstructed frames
#[derive(Debug, Clone, Default)]
pub struct Replayer {
    frames: Vec<Frame>,
    subscription_events: Vec<SubscriptionEvent>,
    cursor: usize,
}

impl Replayer {
    /// Rebuild frames from decoded entries
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Result<Self> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut subscription_events = Vec::new();

        for entry in entries {
            match entry {
                LogEntry::Init {
                    timestamp,
                    model_diff,
                    effects,
                } => {
                    let mut model = Value::empty_object();
                    apply(&mut model, &model_diff)?;
                    frames.push(Frame {
                        timestamp,
                        message: None,
                        effects,
                        model,
                    });
                }
                LogEntry::Update {
                    timestamp,
                    message,
                    model_diff,
                    effects,
                } => {
                    let Some(previous) = frames.last() else {
                        return Err(Error::NotInitialized("update entry before init entry"));
                    };
                    let mut model = previous.model.clone();
                    apply(&mut model, &model_diff)?;
                    frames.push(Frame {
                        timestamp,
                        message: Some(message),
                        effects,
                        model,
                    });
                }
                LogEntry::SubscriptionChange {
                    timestamp,
                    started,
                    stopped,
                } => subscription_events.push(SubscriptionEvent {
                    after_frame: frames.len().saturating_sub(1),
                    timestamp,
                    started,
                    stopped,
                }),
            }
        }

        Ok(Self {
            frames,
            subscription_events,
            cursor: 0,
        })
    }

    /// Decode a log and rebuild its frames
    pub fn from_reader<R: BufRead>(source: R) -> Result<Self> {
        Self::from_entries(LogReader::new(source).read_all()?)
    }

    /// All frames in log order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Subscription changes in log order
    pub fn subscription_events(&self) -> &[SubscriptionEvent] {
        &self.subscription_events
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the log held no init/update entries
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Model after frame `index`
    pub fn model_at(&self, index: usize) -> Option<&Value> {
        self.frames.get(index).map(|frame| &frame.model)
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Frame under the cursor
    pub fn current(&self) -> Option<&Frame> {
        self.frames.get(self.cursor)
    }

    /// Move the cursor to `index`
    pub fn goto(&mut self, index: usize) -> Option<&Frame> {
        if index >= self.frames.len() {
            return None;
        }
        self.cursor = index;
        self.current()
    }

    /// Advance one frame; returns false at the end
    pub fn step_forward(&mut self) -> bool {
        if self.cursor + 1 >= self.frames.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Go back one frame; returns false at the start
    pub fn step_back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }
}
