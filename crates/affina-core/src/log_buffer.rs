use crate::sanitize::sanitize;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const LOG_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub text: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.at.format("%H:%M:%S"), self.text)
    }
}

/// Rolling activity log holding the most recent [`LOG_CAPACITY`] sanitized lines.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizes `raw` and appends it, evicting the oldest entry when full.
    ///
    /// Lines that are empty after sanitizing are dropped and `None` is returned.
    pub fn push(&mut self, raw: &str, at: DateTime<Local>) -> Option<&LogEntry> {
        let text = sanitize(raw);
        if text.is_empty() {
            return None;
        }
        while self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry { at, text });
        self.entries.back()
    }

    /// Replaces the buffer with the sanitized tail of `lines`.
    ///
    /// Returns the retained texts in order so callers can derive status from them.
    pub fn replace_with<'a, I>(&mut self, lines: I, at: DateTime<Local>) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.entries.clear();
        for line in lines {
            self.push(line, at);
        }
        self.entries.iter().map(|entry| entry.text.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.entries.iter().map(LogEntry::render).collect()
    }
}
