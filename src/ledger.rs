//! Context Ledger
//!
//! Two independent append-only ring buffers: typed context entries feeding
//! the coaching view, and plain diagnostic lines from the analysis loop.
//! Entries are never mutated after push; eviction is strictly FIFO.

use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// Maximum retained context entries
pub const MAX_CONTEXT_ENTRIES: usize = 20;

/// Number of context entries surfaced to the coaching view
pub const VISIBLE_CONTEXT_ENTRIES: usize = 6;

/// Maximum retained diagnostic lines
pub const MAX_DIAGNOSTICS: usize = 12;

/// Category of a context entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Environment,
    Speech,
    VisualCue,
    Analysis,
    Emotion,
}

/// A single immutable observation pushed by the poller or speech intake
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub id: u64,
    pub timestamp: DateTime<Local>,
    pub kind: ContextKind,
    pub label: String,
    pub value: String,
}

/// Append-only ledger with capped FIFO buffers
#[derive(Debug, Default)]
pub struct ContextLedger {
    entries: VecDeque<ContextEntry>,
    diagnostics: VecDeque<String>,
    next_id: u64,
}

impl ContextLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a context entry, evicting the oldest once over capacity
    pub fn push_entry(&mut self, kind: ContextKind, label: &str, value: &str) {
        let entry = ContextEntry {
            id: self.next_id,
            timestamp: Local::now(),
            kind,
            label: label.to_string(),
            value: value.to_string(),
        };
        self.next_id += 1;

        self.entries.push_back(entry);
        while self.entries.len() > MAX_CONTEXT_ENTRIES {
            self.entries.pop_front();
        }
    }

    /// Append a diagnostic line, evicting the oldest once over capacity
    pub fn push_diagnostic(&mut self, line: &str) {
        self.diagnostics.push_back(line.to_string());
        while self.diagnostics.len() > MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
    }

    /// Most recent `n` context entries, newest first
    pub fn recent(&self, n: usize) -> Vec<ContextEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// The entries surfaced to the coaching view
    pub fn visible(&self) -> Vec<ContextEntry> {
        self.recent(VISIBLE_CONTEXT_ENTRIES)
    }

    /// All retained diagnostic lines, oldest first
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.iter().cloned().collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.len()
    }
}
