//! Fixed-capacity FIFO of the most recent step executions.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::types::FeedbackEntry;

/// Number of recent executions kept as short-term evidence for re-planning.
pub const FEEDBACK_WINDOW_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackWindow {
    capacity: usize,
    entries: VecDeque<FeedbackEntry>,
}

impl Default for FeedbackWindow {
    fn default() -> Self {
        Self::with_capacity(FEEDBACK_WINDOW_CAPACITY)
    }
}

impl FeedbackWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: FeedbackEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &FeedbackEntry> {
        self.entries.iter()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "step {}: {}\nresult: {}",
                    entry.step_index + 1,
                    entry.command.trim(),
                    entry.result.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
