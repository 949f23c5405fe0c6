//! In-memory sinks for exercising log writers in tests

use std::io::{self, Write};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A cloneable in-memory sink; every clone appends to the same buffer
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8
    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Written lines without their terminators
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink that rejects every write
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSink;

impl Write for FailingSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }
}

/// A sink that rejects chosen writes and records the rest in a [`SharedBuffer`]
///
/// Writes are numbered from 1. Log writers emit one `write` per line, so the
/// numbers select which lines fail. Clones share the counter and buffer.
#[derive(Debug, Clone, Default)]
pub struct FlakySink {
    buffer: SharedBuffer,
    failing: Arc<HashSet<usize>>,
    writes: Arc<AtomicUsize>,
}

impl FlakySink {
    /// Fail the writes numbered in `writes`
    pub fn failing_on(writes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            buffer: SharedBuffer::new(),
            failing: Arc::new(writes.into_iter().collect()),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lines that made it through
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Number of write attempts so far, failed ones included
    pub fn attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Write for FlakySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.contains(&attempt) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink hiccup"));
        }
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
