//! Step executor: drives one step through model-chosen tool calls.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use super::clip;
use crate::core::types::{
    ExecutionStop, ExecutorTurn, FeedbackEntry, SideEffect, StepExecution, ToolInvocationResult,
    TurnAction,
};
use crate::io::events::Event;
use crate::io::human::Question;
use crate::io::model::Contract;
use crate::io::prompt::ExecutorPrompt;
use crate::io::run_state::{InFlightStep, RunState};
use crate::runtime::Runtime;
use crate::tools::{self, ToolOutcome};

/// Full output kept for the most recent tool calls in the prompt; older ones are clipped.
const FULL_TRACE_ENTRIES: usize = 3;
const CLIPPED_OUTPUT_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRun {
    Finished(StepExecution),
    /// A tool is waiting for a human; the partial trace is in `RunState::in_flight`.
    Suspended(Question),
}

/// Execute the step at the plan cursor.
///
/// Afterwards the step's result is in the rolling history, the feedback window
/// and `last_execution`; `working_directory` reflects any successful `cd`.
#[instrument(skip_all, fields(step_index = state.plan.cursor()))]
pub fn execute_step(rt: &Runtime<'_>, state: &mut RunState) -> Result<StepRun> {
    let index = state.plan.cursor();
    let step = state
        .plan
        .current()
        .cloned()
        .ok_or_else(|| anyhow!("no step at cursor {index}"))?;
    let max_calls = rt.config.executor.max_tool_calls;
    let tree = match rt.projects.load() {
        Ok(project) => project.tree,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "project record unavailable for executor prompt");
            String::new()
        }
    };

    let (mut trace, mut calls_made) = match state.in_flight.take() {
        Some(flight) => {
            info!(tool = flight.pending_call.name(), "re-issuing interrupted tool call");
            let mut trace = flight.trace;
            match tools::invoke(rt, state, &flight.pending_call)? {
                ToolOutcome::Suspended(question) => {
                    state.in_flight = Some(InFlightStep {
                        trace,
                        pending_call: flight.pending_call,
                        calls_made: flight.calls_made,
                    });
                    return Ok(StepRun::Suspended(question));
                }
                ToolOutcome::Done(result) => {
                    emit_file_events(rt, index, &result)?;
                    trace.push(result);
                }
            }
            (trace, flight.calls_made)
        }
        None => (Vec::new(), 0),
    };

    let (result, stop) = loop {
        if calls_made >= max_calls {
            warn!(max_calls, "tool-call ceiling reached");
            break (
                format!("Stopped after {max_calls} tool calls without finishing the step."),
                ExecutionStop::ToolLimit,
            );
        }
        let working_directory = state.working_directory.display().to_string();
        let history = state.history.render();
        let trace_text = render_trace(&trace);
        let description = step.describe();
        let prompt = rt.prompts.executor(&ExecutorPrompt {
            request: &state.user_query,
            step: &description,
            working_directory: &working_directory,
            session: &state.session_name,
            project_id: &state.project_id,
            history: &history,
            tree: &tree,
            trace: &trace_text,
            max_calls,
            calls_left: max_calls - calls_made,
        })?;
        let turn: ExecutorTurn = rt.model.invoke(
            Contract::ExecutorTurn,
            &prompt,
            &state.working_directory,
            None,
        )?;
        match turn.action {
            TurnAction::Finish { result } => break (result, ExecutionStop::Finished),
            TurnAction::Call { call } => {
                calls_made += 1;
                info!(tool = call.name(), calls_made, thought = %clip(&turn.thought, 200), "tool call");
                match tools::invoke(rt, state, &call)? {
                    ToolOutcome::Suspended(question) => {
                        state.in_flight = Some(InFlightStep {
                            trace,
                            pending_call: call,
                            calls_made,
                        });
                        return Ok(StepRun::Suspended(question));
                    }
                    ToolOutcome::Done(result) => {
                        emit_file_events(rt, index, &result)?;
                        trace.push(result);
                    }
                }
            }
        }
    };

    let execution = StepExecution {
        step_index: index,
        title: step.title.clone(),
        result,
        stop,
        trace,
    };
    state.history.push(&step.title, &execution.result);
    state.feedback_window.push(FeedbackEntry {
        step_index: index,
        command: step.title.clone(),
        result: execution.render(),
    });
    state.last_execution = Some(execution.clone());
    info!(stop = ?execution.stop, calls = execution.trace.len(), "step executed");
    Ok(StepRun::Finished(execution))
}

fn emit_file_events(rt: &Runtime<'_>, step_index: usize, result: &ToolInvocationResult) -> Result<()> {
    for effect in &result.side_effects {
        if let SideEffect::FileChanged { path, created } = effect {
            rt.events.emit(&Event::FileChanged {
                step_index,
                path: path.clone(),
                created: *created,
            })?;
        }
    }
    Ok(())
}

fn render_trace(trace: &[ToolInvocationResult]) -> String {
    let full_from = trace.len().saturating_sub(FULL_TRACE_ENTRIES);
    trace
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let output = if i < full_from {
                clip(entry.output_text.trim(), CLIPPED_OUTPUT_CHARS)
            } else {
                entry.output_text.trim().to_string()
            };
            format!("#{} {} {}\n{}", i + 1, entry.tool_name, entry.inputs, output)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
