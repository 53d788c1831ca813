//! Commit filter for recognized utterances
//!
//! Providers report noisy, duplicated finals. The filter normalizes
//! whitespace, drops fragments under the minimum length, drops immediate
//! repeats, and keeps a rolling window of recent utterances.

use std::collections::VecDeque;

/// Minimum normalized length for a committed utterance
pub const MIN_COMMIT_LEN: usize = 8;

/// Rolling window of recent committed utterances
pub const MAX_RECENT_UTTERANCES: usize = 5;

/// Collapse internal whitespace and trim; `None` if too short to keep
pub fn normalize_commit(raw: &str) -> Option<String> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() < MIN_COMMIT_LEN {
        return None;
    }
    Some(normalized)
}

/// Stateful filter applied to every provider-reported final result
#[derive(Debug, Default)]
pub struct CommitFilter {
    last: Option<String>,
    recent: VecDeque<String>,
}

impl CommitFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a raw final result. Returns the normalized utterance when it
    /// passes the filter, recording it in the rolling window.
    pub fn accept(&mut self, raw: &str) -> Option<String> {
        let text = normalize_commit(raw)?;

        if self.last.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.last = Some(text.clone());

        self.recent.push_back(text.clone());
        while self.recent.len() > MAX_RECENT_UTTERANCES {
            self.recent.pop_front();
        }

        Some(text)
    }

    /// Recent accepted utterances, oldest first
    pub fn recent(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    /// Most recent accepted utterance, used as the conversation topic
    pub fn current_topic(&self) -> Option<&str> {
        self.recent.back().map(String::as_str)
    }
}
