//! The control loop: `Planning -> Executing -> Analyzing -> (Executing | Terminated)`.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::agents::planner::{PlanRequest, PlanningOutcome, plan_with_review};
use crate::core::machine::{Phase, after_planning};
use crate::core::plan::Plan;
use crate::core::types::StepRecord;
use crate::io::human::Question;
use crate::io::init::RunnerPaths;
use crate::io::plan_store::PlanStore;
use crate::io::run_state::{RunState, write_run_state};
use crate::runtime::Runtime;
use crate::step::{analyze_phase, execute_phase};

/// How `run_loop` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step ran; the plan is exhausted.
    Completed { steps_executed: usize },
    /// Waiting on a human; state is persisted and `resume` continues it.
    NeedsInput { run_id: String, question: Question },
}

/// Run-independent inputs of the loop.
pub struct LoopContext<'a> {
    pub paths: &'a RunnerPaths,
    pub plans: &'a dyn PlanStore,
    /// Project summary and tree handed to the planner.
    pub project_context: &'a str,
}

/// Drive `state` until the plan is exhausted or a human answer is needed.
///
/// State is persisted before every phase. Errors leave the last persisted
/// state and all sessions in place.
pub fn run_loop<F: FnMut(&StepRecord)>(
    rt: &Runtime<'_>,
    state: &mut RunState,
    ctx: &LoopContext<'_>,
    mut on_step: F,
) -> Result<RunOutcome> {
    let state_path = ctx.paths.run_state_path(&state.run_id);
    let steps_dir = ctx.paths.steps_dir(&state.run_id);
    state.pending = None;

    loop {
        write_run_state(&state_path, state)?;
        debug!(phase = state.phase.as_str(), cursor = state.plan.cursor(), "loop tick");
        match state.phase {
            Phase::Planning => {
                if let Some(question) = planning_phase(rt, state, ctx)? {
                    return suspend(state, &state_path, question);
                }
            }
            Phase::Executing => {
                if state.plan.is_complete() {
                    state.phase = Phase::Terminated;
                    continue;
                }
                if let Some(question) = execute_phase(rt, state)? {
                    return suspend(state, &state_path, question);
                }
            }
            Phase::Analyzing => {
                let record = analyze_phase(rt, state, &steps_dir)?;
                on_step(&record);
            }
            Phase::Terminated => {
                info!(steps_executed = state.steps_executed, "run complete");
                if rt.config.terminal.kill_on_complete {
                    teardown_sessions(rt, state);
                }
                return Ok(RunOutcome::Completed {
                    steps_executed: state.steps_executed,
                });
            }
        }
    }
}

fn planning_phase(
    rt: &Runtime<'_>,
    state: &mut RunState,
    ctx: &LoopContext<'_>,
) -> Result<Option<Question>> {
    let mut draft = state.draft.take();
    let outcome = {
        let req = PlanRequest {
            request: &state.user_query,
            project: ctx.project_context,
            image: state.image.as_deref(),
            workdir: &state.working_directory,
        };
        plan_with_review(rt, &req, &mut draft)?
    };
    match outcome {
        PlanningOutcome::Suspended(question) => {
            state.draft = draft;
            Ok(Some(question))
        }
        PlanningOutcome::Accepted(steps) => {
            if let Some(change_request) = &state.change_request {
                ctx.plans.save(change_request, &steps)?;
            }
            state.plan = Plan::new(steps);
            state.phase = after_planning(&state.plan);
            Ok(None)
        }
    }
}

fn suspend(state: &mut RunState, state_path: &Path, question: Question) -> Result<RunOutcome> {
    info!(kind = ?question.kind, phase = state.phase.as_str(), "suspending for human input");
    state.pending = Some(question.clone());
    write_run_state(state_path, state)?;
    Ok(RunOutcome::NeedsInput {
        run_id: state.run_id.clone(),
        question,
    })
}

/// Kill the primary session and every background session of the run.
fn teardown_sessions(rt: &Runtime<'_>, state: &RunState) {
    let names = std::iter::once(&state.session_name).chain(state.background_sessions.iter());
    for name in names {
        match rt.terminal.kill_session(name) {
            Ok(killed) => debug!(session = %name, killed, "session teardown"),
            Err(err) => warn!(session = %name, err = %format!("{err:#}"), "failed to kill session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Revision;
    use crate::io::human::{InputKind, Reply};
    use crate::io::model::Contract;
    use crate::io::run_state::load_run_state;
    use crate::test_support::{Harness, ScriptedHuman, feedback_json, finish_json, plan_json};

    /// Verifies an empty accepted plan terminates without executing anything.
    #[test]
    fn empty_plan_terminates_immediately() {
        let harness = Harness::new();
        harness.model.push(Contract::Plan, plan_json(&[]));
        let human = ScriptedHuman::new(vec![Reply::Answer("yes".to_string())]);
        let mut state = harness.run_state("run-empty");

        let outcome = harness
            .with_runtime(&human, |rt| {
                run_loop(rt, &mut state, &harness.loop_context(), |_| {})
            })
            .expect("loop");
        assert_eq!(outcome, RunOutcome::Completed { steps_executed: 0 });
        assert!(state.terminated());
        assert!(harness.model.prompts(Contract::ExecutorTurn).is_empty());
    }

    /// Verifies a pending plan review persists the draft and the question.
    #[test]
    fn pending_review_suspends_and_persists() {
        let harness = Harness::new();
        harness.model.push(Contract::Plan, plan_json(&["A"]));
        let mut state = harness.run_state("run-review");

        let outcome = harness
            .with_runtime(&ScriptedHuman::new(vec![Reply::Pending]), |rt| {
                run_loop(rt, &mut state, &harness.loop_context(), |_| {})
            })
            .expect("loop");
        let RunOutcome::NeedsInput { question, .. } = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(question.kind, InputKind::PlanReview);

        let saved = load_run_state(&harness.paths.run_state_path("run-review")).expect("load");
        assert_eq!(saved.phase, Phase::Planning);
        assert_eq!(saved.pending, Some(question));
        assert_eq!(saved.draft.map(|d| d.len()), Some(1));
    }

    #[test]
    fn accepted_plan_is_saved_under_change_request() {
        let harness = Harness::new();
        harness.model.push(Contract::Plan, plan_json(&["A"]));
        harness.model.push(Contract::ExecutorTurn, finish_json("did A"));
        harness
            .model
            .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
        let mut state = harness.run_state("run-cr");
        state.change_request = Some("cr-9".to_string());
        let human = ScriptedHuman::new(vec![Reply::Answer("y".to_string())]);

        let mut seen = Vec::new();
        harness
            .with_runtime(&human, |rt| {
                run_loop(rt, &mut state, &harness.loop_context(), |record| {
                    seen.push(record.title.clone())
                })
            })
            .expect("loop");
        assert_eq!(seen, vec!["A"]);
        let stored = harness.plans.load("cr-9").expect("load").expect("stored");
        assert_eq!(stored.len(), 1);
    }
}
