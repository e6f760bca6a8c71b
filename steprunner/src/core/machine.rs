//! Control-loop phases and their transitions.
//!
//! `Planning -> Executing -> Analyzing -> (Executing | Terminated)`. The human
//! review sub-loop inside planning is not a phase transition.

use serde::{Deserialize, Serialize};

use crate::core::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Executing,
    Analyzing,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Analyzing => "analyzing",
            Phase::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminated)
    }
}

/// Phase after the planner produced an accepted plan.
///
/// An empty plan has nothing to execute and terminates immediately.
pub fn after_planning(plan: &Plan) -> Phase {
    if plan.is_empty() {
        Phase::Terminated
    } else {
        Phase::Executing
    }
}

/// Phase after a step finished executing.
pub fn after_execution() -> Phase {
    Phase::Analyzing
}

/// Phase after the analyzer revised the tail and the cursor advanced.
pub fn after_analysis(plan: &Plan) -> Phase {
    if plan.is_complete() {
        Phase::Terminated
    } else {
        Phase::Executing
    }
}
