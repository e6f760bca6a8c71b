//! Persisted state of one control-loop run (`.steprunner/runs/<run-id>/state.json`).

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::human::Question;
use super::{read_json, write_json_atomic};
use crate::core::feedback_window::FeedbackWindow;
use crate::core::history::RollingHistory;
use crate::core::machine::Phase;
use crate::core::plan::Plan;
use crate::core::types::{Step, StepExecution, ToolCall, ToolInvocationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    /// Original request; never changes during the run.
    pub user_query: String,
    #[serde(default)]
    pub change_request: Option<String>,
    #[serde(default)]
    pub image: Option<PathBuf>,
    pub project_id: String,
    pub phase: Phase,
    pub plan: Plan,
    pub history: RollingHistory,
    pub feedback_window: FeedbackWindow,
    #[serde(default)]
    pub last_execution: Option<StepExecution>,
    pub working_directory: PathBuf,
    pub session_name: String,
    #[serde(default)]
    pub background_sessions: Vec<String>,
    /// Web-search permission, once the human has been asked.
    #[serde(default)]
    pub search_consent: Option<bool>,
    /// Draft plan awaiting review while planning.
    #[serde(default)]
    pub draft: Option<Vec<Step>>,
    /// Tool calls of a step interrupted by a question.
    #[serde(default)]
    pub in_flight: Option<InFlightStep>,
    /// Question the run is suspended on.
    #[serde(default)]
    pub pending: Option<Question>,
    #[serde(default)]
    pub steps_executed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightStep {
    pub trace: Vec<ToolInvocationResult>,
    /// The call that asked the pending question; re-issued on resume.
    pub pending_call: ToolCall,
    pub calls_made: u32,
}

/// Fields fixed when a run starts.
#[derive(Debug, Clone)]
pub struct RunSeed {
    pub run_id: String,
    pub user_query: String,
    pub change_request: Option<String>,
    pub image: Option<PathBuf>,
    pub project_id: String,
    pub working_directory: PathBuf,
    pub session_name: String,
    pub history_token_budget: usize,
}

impl RunState {
    pub fn new(seed: RunSeed) -> Self {
        Self {
            run_id: seed.run_id,
            user_query: seed.user_query,
            change_request: seed.change_request,
            image: seed.image,
            project_id: seed.project_id,
            phase: Phase::Planning,
            plan: Plan::default(),
            history: RollingHistory::new(seed.history_token_budget),
            feedback_window: FeedbackWindow::default(),
            last_execution: None,
            working_directory: seed.working_directory,
            session_name: seed.session_name,
            background_sessions: Vec::new(),
            search_consent: None,
            draft: None,
            in_flight: None,
            pending: None,
            steps_executed: 0,
        }
    }

    pub fn terminated(&self) -> bool {
        self.phase.is_terminal()
    }
}

pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let state: RunState = read_json(path)?;
    debug!(run_id = %state.run_id, phase = state.phase.as_str(), cursor = state.plan.cursor(), "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), run_id = %state.run_id, phase = state.phase.as_str(), "writing run state");
    write_json_atomic(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::human::InputKind;

    fn seed(root: &Path) -> RunSeed {
        RunSeed {
            run_id: "run-1".to_string(),
            user_query: "add a login page".to_string(),
            change_request: Some("cr-7".to_string()),
            image: None,
            project_id: "shop".to_string(),
            working_directory: root.to_path_buf(),
            session_name: "shop-000001".to_string(),
            history_token_budget: 500,
        }
    }

    /// Verifies a suspended run survives a write/load cycle including its in-flight step.
    #[test]
    fn suspended_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = RunState::new(seed(temp.path()));
        state.phase = Phase::Executing;
        state.plan = Plan::new(vec![Step::new("A", "a"), Step::new("B", "b")]);
        state.history.push("A", "done");
        state.pending = Some(Question::new(InputKind::AskUser, "Which port?"));
        state.in_flight = Some(InFlightStep {
            trace: Vec::new(),
            pending_call: ToolCall::AskUser {
                reason: "Which port?".to_string(),
            },
            calls_made: 3,
        });

        let path = temp.path().join("runs/run-1/state.json");
        write_run_state(&path, &state).expect("write");
        let loaded = load_run_state(&path).expect("load");
        assert_eq!(loaded, state);
        assert!(!loaded.terminated());
    }

    #[test]
    fn new_run_starts_in_planning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = RunState::new(seed(temp.path()));
        assert_eq!(state.phase, Phase::Planning);
        assert!(state.plan.is_empty());
        assert_eq!(state.search_consent, None);
    }
}
