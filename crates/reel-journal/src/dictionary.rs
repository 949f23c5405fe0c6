//! Incrementally built string dictionary for compressed logs
//!
//! Every distinct string gets a small integer id the first time it is seen.
//! Newly assigned ids stay pending until the next [`Dictionary::flush_pending`],
//! which is how the log writer knows which definitions still have to be
//! emitted before a line that uses them.

use indexmap::IndexMap;

/// String interning table with a pending-definition queue
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    next_id: u64,
    assigned: IndexMap<String, u64>,
    pending: IndexMap<u64, String>,
}

impl Dictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id for `s`, assigning a fresh one on first sight
    pub fn get_reference(&mut self, s: &str) -> u64 {
        if let Some(id) = self.assigned.get(s) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.assigned.insert(s.to_string(), id);
        self.pending.insert(id, s.to_string());
        id
    }

    /// Drain definitions assigned since the previous flush, ordered by id
    pub fn flush_pending(&mut self) -> IndexMap<u64, String> {
        std::mem::take(&mut self.pending)
    }

    /// Put definitions from a failed flush back in the queue
    ///
    /// Their ids stay assigned, so they must be defined before the next line
    /// that references them.
    pub fn restore_pending(&mut self, definitions: IndexMap<u64, String>) {
        self.pending.extend(definitions);
        self.pending.sort_keys();
    }

    /// Whether any definition is waiting to be flushed
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of strings assigned so far
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Check if no string has been assigned yet
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Look up the id of an already assigned string without assigning
    pub fn lookup(&self, s: &str) -> Option<u64> {
        self.assigned.get(s).copied()
    }
}

/// Render an id as the in-line `@<id>` token
pub fn reference_token(id: u64) -> String {
    format!("@{}", id)
}

/// Parse an `@<id>` token
pub fn parse_reference(token: &str) -> Option<u64> {
    token.strip_prefix('@')?.parse().ok()
}
