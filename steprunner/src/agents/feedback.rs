//! Feedback analyzer: judges the executed step and revises the plan tail.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::{FeedbackResponse, StepExecution};
use crate::io::model::Contract;
use crate::io::prompt::FeedbackPrompt;
use crate::io::run_state::RunState;
use crate::runtime::Runtime;

/// Ask the model whether the step at the cursor is done and how the remaining plan continues.
///
/// Does not touch the plan; the caller applies the returned revision.
#[instrument(skip_all, fields(step_index = execution.step_index))]
pub fn analyze(
    rt: &Runtime<'_>,
    state: &RunState,
    execution: &StepExecution,
) -> Result<FeedbackResponse> {
    let step = state
        .plan
        .current()
        .map(|s| s.describe())
        .unwrap_or_else(|| execution.title.clone());
    let remaining = if state.plan.upcoming().is_empty() {
        String::new()
    } else {
        serde_json::to_string_pretty(state.plan.upcoming()).context("serialize remaining steps")?
    };
    let executed = state
        .plan
        .executed()
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.title))
        .collect::<Vec<_>>()
        .join("\n");
    let recent = state.feedback_window.render();
    let result = execution.render();
    let history = state.history.render();
    let working_directory = state.working_directory.display().to_string();

    let prompt = rt.prompts.feedback(&FeedbackPrompt {
        request: &state.user_query,
        step: &step,
        result: &result,
        remaining: &remaining,
        executed: &executed,
        recent: &recent,
        history: &history,
        working_directory: &working_directory,
    })?;
    let response: FeedbackResponse =
        rt.model
            .invoke(Contract::Feedback, &prompt, &state.working_directory, None)?;
    info!(
        step_completed = response.step_completed,
        revision = ?response.revision,
        new_steps = response.steps.len(),
        "feedback received"
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::Plan;
    use crate::core::types::{ExecutionStop, Revision, Step};
    use crate::test_support::{Harness, ScriptedHuman, feedback_json};

    #[test]
    fn prompt_carries_remaining_and_executed_steps() {
        let harness = Harness::new();
        harness
            .model
            .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
        let mut state = harness.run_state("run-fb");
        state.history.push("Setup venv", "created .venv with python 3.12");
        state.working_directory = harness.root().join("app");
        state.plan = Plan::new(vec![
            Step::new("Setup venv", "a"),
            Step::new("Write view", "b"),
            Step::new("Add template", "c"),
        ]);
        state.plan.advance();
        let execution = StepExecution {
            step_index: 1,
            title: "Write view".to_string(),
            result: "view written".to_string(),
            stop: ExecutionStop::Finished,
            trace: Vec::new(),
        };

        let response = harness
            .with_runtime(&ScriptedHuman::default(), |rt| {
                analyze(rt, &state, &execution)
            })
            .expect("analyze");
        assert_eq!(response.revision, Revision::Keep);

        let prompt = harness.model.prompts(Contract::Feedback)[0].clone();
        assert!(prompt.contains("1. Setup venv"));
        assert!(prompt.contains("Add template"));
        assert!(prompt.contains("view written"));
        assert!(prompt.contains("created .venv with python 3.12"));
        let cwd = format!("Working directory: {}", harness.root().join("app").display());
        assert!(prompt.contains(&cwd));
    }
}
