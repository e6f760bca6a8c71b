//! Loop-level harness tests for full run lifecycle scenarios.
//!
//! These tests drive `run_loop` with a scripted model, a fake multiplexer and
//! scripted human replies to verify plan revision, termination, session
//! teardown and suspend/resume across a persisted state.

use std::fs;

use steprunner::core::machine::Phase;
use steprunner::core::types::{Revision, ToolCall};
use steprunner::io::events::Event;
use steprunner::io::human::{InputKind, PreloadedChannel, Reply};
use steprunner::io::model::Contract;
use steprunner::io::run_state::load_run_state;
use steprunner::looping::{RunOutcome, run_loop};
use steprunner::test_support::{
    Harness, MuxCall, ScriptedHuman, call_json, feedback_json, finish_json, plan_json,
};

fn accept() -> ScriptedHuman {
    ScriptedHuman::new(vec![Reply::Answer("yes".to_string())])
}

/// Full lifecycle: plan `[A, B, C]`, keep after A, replace the tail with `[B2]` after B,
/// keep after B2.
///
/// Execution sequence:
/// 1. A executes → keep (tail `[B, C]`)
/// 2. B executes → replace (tail `[B2]`, C dropped)
/// 3. B2 executes → keep → plan exhausted
///
/// Tests: tail replacement, cursor advancing by one, step logs, events, and termination.
#[test]
fn replaced_tail_drops_unexecuted_steps() {
    let harness = Harness::new();
    harness.model.push(Contract::Plan, plan_json(&["A", "B", "C"]));
    for result in ["did A", "did B", "did B2"] {
        harness.model.push(Contract::ExecutorTurn, finish_json(result));
    }
    harness
        .model
        .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
    harness
        .model
        .push(Contract::Feedback, feedback_json(true, Revision::Replace, &["B2"]));
    harness
        .model
        .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
    let mut state = harness.run_state("run-abc");

    let mut executed = Vec::new();
    let outcome = harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |record| {
                executed.push(record.title.clone());
            })
        })
        .expect("loop");

    assert_eq!(outcome, RunOutcome::Completed { steps_executed: 3 });
    assert_eq!(executed, vec!["A", "B", "B2"]);
    assert_eq!(state.plan.titles(), vec!["A", "B", "B2"]);
    assert!(state.plan.is_complete());
    assert_eq!(state.phase, Phase::Terminated);

    let executor_prompts = harness.model.prompts(Contract::ExecutorTurn);
    assert_eq!(executor_prompts.len(), 3);
    assert!(executor_prompts[2].contains("B2"));

    let steps_dir = harness.paths.steps_dir("run-abc");
    for index in 0..3 {
        assert!(steps_dir.join(index.to_string()).join("feedback.json").exists());
    }
    let completed: Vec<_> = harness
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::StepCompleted { title, .. } => Some(title),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["A", "B", "B2"]);

    let saved = load_run_state(&harness.paths.run_state_path("run-abc")).expect("load");
    assert_eq!(saved.phase, Phase::Terminated);
    assert_eq!(saved.steps_executed, 3);
}

/// Verifies a `replace` revision with no steps leaves the remaining plan intact.
#[test]
fn empty_replacement_keeps_remaining_steps() {
    let harness = Harness::new();
    harness.model.push(Contract::Plan, plan_json(&["A", "B", "C"]));
    for result in ["did A", "did B", "did C"] {
        harness.model.push(Contract::ExecutorTurn, finish_json(result));
        harness
            .model
            .push(Contract::Feedback, feedback_json(true, Revision::Replace, &[]));
    }
    let mut state = harness.run_state("run-empty-replace");

    let mut executed = Vec::new();
    let outcome = harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |record| {
                executed.push(record.title.clone());
            })
        })
        .expect("loop");

    assert_eq!(outcome, RunOutcome::Completed { steps_executed: 3 });
    assert_eq!(executed, vec!["A", "B", "C"]);
    assert_eq!(state.plan.titles(), vec!["A", "B", "C"]);
}

#[test]
fn abort_after_first_step_terminates() {
    let harness = Harness::new();
    harness.model.push(Contract::Plan, plan_json(&["A", "B", "C"]));
    harness.model.push(Contract::ExecutorTurn, finish_json("user wants to stop"));
    harness
        .model
        .push(Contract::Feedback, feedback_json(false, Revision::Abort, &[]));
    let mut state = harness.run_state("run-abort");

    let outcome = harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |_| {})
        })
        .expect("loop");
    assert_eq!(outcome, RunOutcome::Completed { steps_executed: 1 });
    assert_eq!(state.plan.titles(), vec!["A"]);
    assert_eq!(harness.model.prompts(Contract::ExecutorTurn).len(), 1);
}

/// Verifies completion tears down the primary and background sessions.
#[test]
fn completion_kills_run_sessions() {
    let harness = Harness::new();
    harness.model.push(Contract::Plan, plan_json(&["Serve"]));
    harness.model.push(
        Contract::ExecutorTurn,
        call_json(&ToolCall::StartBackgroundService {
            command: "python -m http.server".to_string(),
            session_suffix: Some("web".to_string()),
        }),
    );
    harness.model.push(Contract::ExecutorTurn, finish_json("server started"));
    harness
        .model
        .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
    let mut state = harness.run_state("run-serve");
    harness.start_session(&mut state);

    harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |_| {})
        })
        .expect("loop");

    assert_eq!(state.background_sessions, vec!["shop-run-serve-web"]);
    assert_eq!(
        harness.mux.commands("shop-run-serve-web"),
        vec!["python -m http.server"]
    );
    assert!(!harness.mux.is_live("shop-run-serve"));
    assert!(!harness.mux.is_live("shop-run-serve-web"));
    let kills = harness
        .mux
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MuxCall::Kill(_)))
        .count();
    assert_eq!(kills, 2);
}

#[test]
fn sessions_survive_when_teardown_is_disabled() {
    let mut harness = Harness::new();
    harness.config.terminal.kill_on_complete = false;
    harness.model.push(Contract::Plan, plan_json(&[]));
    let mut state = harness.run_state("run-keep");
    harness.start_session(&mut state);

    harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |_| {})
        })
        .expect("loop");
    assert!(harness.mux.is_live("shop-run-keep"));
}

/// Verifies a run suspended by `ask_user` resumes from disk with the supplied answer.
///
/// Execution sequence:
/// 1. Plan `[Configure port]` accepted
/// 2. Executor calls `read_file`, then `ask_user` → no answer available → suspend
/// 3. State reloaded from disk; resume answers "8080"
/// 4. `ask_user` is re-issued and answered, executor finishes, feedback keeps → complete
#[test]
fn ask_user_suspends_and_resumes_from_disk() {
    let harness = Harness::new();
    fs::write(harness.root().join("settings.py"), "PORT = None\n").expect("write");
    harness.model.push(Contract::Plan, plan_json(&["Configure port"]));
    harness.model.push(
        Contract::ExecutorTurn,
        call_json(&ToolCall::ReadFile {
            path: "settings.py".to_string(),
        }),
    );
    harness.model.push(
        Contract::ExecutorTurn,
        call_json(&ToolCall::AskUser {
            reason: "Which port should the app listen on?".to_string(),
        }),
    );
    let mut state = harness.run_state("run-ask");

    let outcome = harness
        .with_runtime(&accept(), |rt| {
            run_loop(rt, &mut state, &harness.loop_context(), |_| {})
        })
        .expect("first pass");
    let RunOutcome::NeedsInput { run_id, question } = outcome else {
        panic!("expected suspension");
    };
    assert_eq!(run_id, "run-ask");
    assert_eq!(question.kind, InputKind::AskUser);

    let mut resumed = load_run_state(&harness.paths.run_state_path("run-ask")).expect("load");
    assert_eq!(resumed.phase, Phase::Executing);
    assert_eq!(resumed.pending, Some(question));
    let flight = resumed.in_flight.clone().expect("in flight");
    assert_eq!(flight.trace.len(), 1);
    assert!(flight.trace[0].output_text.contains("PORT = None"));

    harness
        .model
        .push(Contract::ExecutorTurn, finish_json("set PORT = 8080"));
    harness
        .model
        .push(Contract::Feedback, feedback_json(true, Revision::Keep, &[]));
    let fallback = ScriptedHuman::default();
    let human = PreloadedChannel::new(Some("8080".to_string()), &fallback);
    let outcome = harness
        .with_runtime(&human, |rt| {
            run_loop(rt, &mut resumed, &harness.loop_context(), |_| {})
        })
        .expect("resume");

    assert_eq!(outcome, RunOutcome::Completed { steps_executed: 1 });
    assert!(fallback.asked().is_empty());
    assert!(resumed.pending.is_none());
    assert!(resumed.in_flight.is_none());
    let execution = resumed.last_execution.expect("execution");
    assert_eq!(execution.trace.len(), 2);
    assert_eq!(execution.trace[1].tool_name, "ask_user");
    assert_eq!(execution.trace[1].output_text, "8080");
}
