//! One plan step through the executor and the feedback analyzer.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agents::executor::{StepRun, execute_step};
use crate::agents::feedback::analyze;
use crate::core::machine::{after_analysis, after_execution};
use crate::core::types::{Revision, StepRecord};
use crate::io::events::Event;
use crate::io::human::Question;
use crate::io::run_state::RunState;
use crate::io::step_log::{StepLogRequest, write_step_log};
use crate::runtime::Runtime;

/// Execute the step at the cursor and move to `Analyzing`.
///
/// Returns the question if a tool suspended the step.
pub fn execute_phase(rt: &Runtime<'_>, state: &mut RunState) -> Result<Option<Question>> {
    match execute_step(rt, state)? {
        StepRun::Suspended(question) => Ok(Some(question)),
        StepRun::Finished(_) => {
            state.phase = after_execution();
            Ok(None)
        }
    }
}

/// Analyze `last_execution`, log the step, revise the tail, and advance the cursor by one.
#[instrument(skip_all, fields(cursor = state.plan.cursor()))]
pub fn analyze_phase(rt: &Runtime<'_>, state: &mut RunState, steps_dir: &Path) -> Result<StepRecord> {
    let index = state.plan.cursor();
    let execution = state
        .last_execution
        .clone()
        .ok_or_else(|| anyhow!("no execution recorded for step {index}"))?;
    if execution.step_index != index {
        return Err(anyhow!(
            "last execution belongs to step {} but the cursor is at {index}",
            execution.step_index
        ));
    }
    let step = state
        .plan
        .current()
        .cloned()
        .ok_or_else(|| anyhow!("no step at cursor {index}"))?;

    let feedback = analyze(rt, state, &execution)?;
    write_step_log(&StepLogRequest {
        steps_dir,
        index,
        step: &step,
        execution: &execution,
        feedback: &feedback,
    })?;
    rt.events.emit(&Event::StepCompleted {
        step_index: index,
        title: step.title.clone(),
        step_completed: feedback.step_completed,
    })?;

    if feedback.revision == Revision::Replace && feedback.steps.is_empty() {
        warn!("replace revision without steps; keeping the remaining plan");
    }
    state.plan.apply(feedback.tail_change());
    state.plan.advance();
    state.steps_executed += 1;
    state.phase = after_analysis(&state.plan);
    info!(
        next_cursor = state.plan.cursor(),
        plan_len = state.plan.len(),
        phase = state.phase.as_str(),
        "step analyzed"
    );

    Ok(StepRecord {
        index,
        title: step.title,
        changed_files: execution.changed_files(),
        execution_result: execution.result,
        step_completed: feedback.step_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::Phase;
    use crate::core::plan::Plan;
    use crate::core::types::{
        ExecutionStop, Revision, SideEffect, Step, StepExecution, ToolCall, ToolInvocationResult,
    };
    use std::path::PathBuf;
    use crate::io::events::Event;
    use crate::io::model::Contract;
    use crate::test_support::{Harness, ScriptedHuman, feedback_json};

    fn analyzing_state(harness: &Harness) -> RunState {
        let mut state = harness.run_state("run-step");
        state.plan = Plan::new(vec![
            Step::new("A", "a"),
            Step::new("B", "b"),
            Step::new("C", "c"),
        ]);
        state.phase = Phase::Analyzing;
        state.last_execution = Some(StepExecution {
            step_index: 0,
            title: "A".to_string(),
            result: "did A".to_string(),
            stop: ExecutionStop::Finished,
            trace: Vec::new(),
        });
        state
    }

    /// Verifies abort truncates the tail, terminates, and still logs the step.
    #[test]
    fn abort_terminates_after_current_step() {
        let harness = Harness::new();
        harness.model.push(
            Contract::Feedback,
            feedback_json(true, Revision::Abort, &[]),
        );
        let mut state = analyzing_state(&harness);
        let steps_dir = harness.root().join("steps");

        let record = harness
            .with_runtime(&ScriptedHuman::default(), |rt| {
                analyze_phase(rt, &mut state, &steps_dir)
            })
            .expect("analyze");

        assert_eq!(record.title, "A");
        assert!(record.step_completed);
        assert!(record.changed_files.is_empty());
        assert_eq!(state.plan.titles(), vec!["A"]);
        assert_eq!(state.phase, Phase::Terminated);
        assert!(steps_dir.join("0").join("feedback.json").exists());
        assert!(harness.events.events().contains(&Event::StepCompleted {
            step_index: 0,
            title: "A".to_string(),
            step_completed: true,
        }));
    }

    #[test]
    fn mismatched_execution_is_rejected() {
        let harness = Harness::new();
        let mut state = analyzing_state(&harness);
        state.plan.advance();
        let steps_dir = harness.root().join("steps");
        let err = harness
            .with_runtime(&ScriptedHuman::default(), |rt| {
                analyze_phase(rt, &mut state, &steps_dir)
            })
            .expect_err("mismatch");
        assert!(err.to_string().contains("cursor is at 1"));
    }

    /// Verifies the step record lists each written file once, in call order.
    #[test]
    fn record_lists_changed_files_once() {
        let harness = Harness::new();
        harness
            .model
            .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
        let mut state = analyzing_state(&harness);
        let edit = |path: &str| ToolCall::EditFile {
            path: path.to_string(),
            instructions: "x".to_string(),
            create: true,
        };
        let written = |path: &str| {
            ToolInvocationResult::new(&edit(path), "written").with_effect(SideEffect::FileChanged {
                path: PathBuf::from(path),
                created: true,
            })
        };
        if let Some(execution) = state.last_execution.as_mut() {
            execution.trace = vec![
                written("/srv/shop/app.py"),
                ToolInvocationResult::new(
                    &ToolCall::RunCommand {
                        command: "cd app".to_string(),
                    },
                    "{}",
                )
                .with_effect(SideEffect::DirectoryChanged {
                    path: PathBuf::from("/srv/shop/app"),
                }),
                written("/srv/shop/views.py"),
                written("/srv/shop/app.py"),
            ];
        }
        let steps_dir = harness.root().join("steps");

        let record = harness
            .with_runtime(&ScriptedHuman::default(), |rt| {
                analyze_phase(rt, &mut state, &steps_dir)
            })
            .expect("analyze");

        assert_eq!(
            record.changed_files,
            vec![
                PathBuf::from("/srv/shop/app.py"),
                PathBuf::from("/srv/shop/views.py")
            ]
        );
    }
}
