//! Ordered, cursor-addressed plan of steps.
//!
//! Steps before the cursor form an append-only execution log: nothing here
//! can rewrite them. Revisions only ever touch the tail after the step that
//! is currently executing.

use serde::{Deserialize, Serialize};

use crate::core::types::{Step, TailChange};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<Step>,
    cursor: usize,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        let mut plan = Self {
            steps: Vec::new(),
            cursor: 0,
        };
        plan.append(steps);
        plan
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the next step to execute.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The step at the cursor, if any remain.
    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    /// Steps already executed (strictly before the cursor).
    pub fn executed(&self) -> &[Step] {
        &self.steps[..self.cursor.min(self.steps.len())]
    }

    /// Steps strictly after the cursor.
    pub fn upcoming(&self) -> &[Step] {
        let start = (self.cursor + 1).min(self.steps.len());
        &self.steps[start..]
    }

    pub fn titles(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.title.as_str()).collect()
    }

    /// True once every step has been consumed.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Insert a step at `index`, which must not lie inside the executed log.
    ///
    /// Inserting at the cursor makes the new step the next one to run.
    pub fn insert(&mut self, index: usize, step: Step) -> Result<(), String> {
        if index < self.cursor {
            return Err(format!(
                "cannot insert at {index}: steps before cursor {} are already executed",
                self.cursor
            ));
        }
        if index > self.steps.len() {
            return Err(format!(
                "cannot insert at {index}: plan has {} steps",
                self.steps.len()
            ));
        }
        self.steps.insert(index, step);
        self.renumber_from(index);
        Ok(())
    }

    /// Replace every step after the current one with `tail`.
    ///
    /// With the cursor at `i` the plan becomes `steps[..=i] + tail`. An empty
    /// `tail` truncates the plan to what has run.
    pub fn replace_tail(&mut self, tail: Vec<Step>) {
        let keep = (self.cursor + 1).min(self.steps.len());
        self.steps.truncate(keep);
        self.append(tail);
    }

    /// Drop every step after the current one.
    pub fn truncate_remaining(&mut self) {
        self.replace_tail(Vec::new());
    }

    pub fn apply(&mut self, change: TailChange) {
        match change {
            TailChange::Keep => {}
            TailChange::Replace(tail) => self.replace_tail(tail),
        }
    }

    /// Move the cursor past the current step.
    pub fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    fn append(&mut self, steps: Vec<Step>) {
        let start = self.steps.len();
        self.steps.extend(steps);
        self.renumber_from(start);
    }

    fn renumber_from(&mut self, start: usize) {
        for (i, step) in self.steps.iter_mut().enumerate().skip(start) {
            step.order = i;
        }
    }
}
