//! Console log buffering.

use std::collections::VecDeque;

use chrono::{SecondsFormat, Utc};

/// Maximum number of console lines retained.
pub const MAX_CONSOLE_LOGS: usize = 1000;

/// Sliding window of timestamp-prefixed console lines.
///
/// Appending past capacity drops the oldest entries first.
#[derive(Debug)]
pub struct ConsoleLogBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ConsoleLogBuffer {
    /// Create a buffer holding at most [`MAX_CONSOLE_LOGS`] lines.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONSOLE_LOGS)
    }

    /// Create a buffer with a custom cap (at least one line).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_CONSOLE_LOGS)),
            capacity,
        }
    }

    /// Append a line, prefixed with the current time.
    pub fn push(&mut self, line: &str) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.entries.push_back(format!("[{stamp}] {line}"));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// All retained lines, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Retained lines containing `needle` (case-insensitive).
    pub fn filtered(&self, needle: &str) -> Vec<String> {
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .filter(|line| line.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained lines.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ConsoleLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
