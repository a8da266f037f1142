//! In-memory chat history
//!
//! Append-only log kept by the participant console. Nothing is persisted.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};

/// One line of chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl HistoryEntry {
    /// Stamp an entry with the current local time
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    /// `"[HH:MM:SS] sender: content"`, or `"[HH:MM:SS] content"` without a sender
    pub fn format(&self) -> String {
        let time = self.timestamp.format("%H:%M:%S");
        if self.sender.is_empty() {
            format!("[{time}] {}", self.content)
        } else {
            format!("[{time}] {}: {}", self.sender, self.content)
        }
    }
}

/// Thread-safe history log
#[derive(Debug, Default)]
pub struct ChatHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sender: impl Into<String>, content: impl Into<String>) {
        self.lock().push(HistoryEntry::new(sender, content));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every entry, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HistoryEntry>> {
        // Entries are only ever pushed, so a poisoned log is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
