//! Token-budgeted rolling memory of step outcomes.
//!
//! Each executed step contributes a `title -> result` pair. When the estimated
//! token count exceeds the budget, the oldest pairs are evicted and only their
//! titles survive in a condensed line.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Per-entry cap on stored result text, in characters.
const MAX_RESULT_CHARS: usize = 1_200;
/// Evicted titles retained in the condensed line.
const MAX_CONDENSED_TITLES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingHistory {
    budget_tokens: usize,
    condensed: VecDeque<String>,
    entries: VecDeque<HistoryEntry>,
}

impl RollingHistory {
    pub fn new(budget_tokens: usize) -> Self {
        Self {
            budget_tokens,
            condensed: VecDeque::new(),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, title: &str, result: &str) {
        self.entries.push_back(HistoryEntry {
            title: title.trim().to_string(),
            result: clip(result.trim(), MAX_RESULT_CHARS),
        });
        // The newest entry always stays, even if it alone exceeds the budget.
        while self.estimated_tokens() > self.budget_tokens && self.entries.len() > 1 {
            if let Some(evicted) = self.entries.pop_front() {
                self.condensed.push_back(evicted.title);
                if self.condensed.len() > MAX_CONDENSED_TITLES {
                    self.condensed.pop_front();
                }
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.condensed.is_empty()
    }

    /// Rough token estimate (four characters per token).
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .entries
            .iter()
            .map(|e| e.title.len() + e.result.len())
            .sum();
        chars.div_ceil(4)
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if !self.condensed.is_empty() {
            let titles: Vec<&str> = self.condensed.iter().map(String::as_str).collect();
            lines.push(format!("Earlier steps: {}", titles.join("; ")));
        }
        for entry in &self.entries {
            lines.push(format!("- {}: {}", entry.title, entry.result));
        }
        lines.join("\n")
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_over_budget() {
        let mut history = RollingHistory::new(20);
        history.push("first", &"a".repeat(40));
        history.push("second", &"b".repeat(40));

        let titles: Vec<&str> = history.entries().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["second"]);
        assert!(history.render().starts_with("Earlier steps: first"));
    }

    #[test]
    fn keeps_everything_within_budget() {
        let mut history = RollingHistory::new(1_000);
        history.push("one", "ok");
        history.push("two", "ok");
        assert_eq!(history.entries().count(), 2);
        assert!(!history.render().contains("Earlier steps"));
    }

    #[test]
    fn clips_long_results() {
        let mut history = RollingHistory::new(10_000);
        history.push("long", &"x".repeat(5_000));
        let entry = history.entries().next().expect("entry");
        assert_eq!(entry.result.chars().count(), MAX_RESULT_CHARS + 3);
    }
}
