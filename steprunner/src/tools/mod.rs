//! The executor's tool palette.
//!
//! Every tool is a [`ToolCall`] variant dispatched through [`invoke`]. Tools
//! report their own I/O and transport failures as result text; only model
//! failures and human-channel errors come back as `Err`.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::types::{ToolCall, ToolInvocationResult};
use crate::io::human::Question;
use crate::io::run_state::RunState;
use crate::runtime::Runtime;

mod files;
mod interaction;
mod project;
mod shell;

pub use files::{edit_file, read_file};

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Done(ToolInvocationResult),
    /// The tool needs a human answer that is not available yet.
    Suspended(Question),
}

#[instrument(skip_all, fields(tool = call.name()))]
pub fn invoke(rt: &Runtime<'_>, state: &mut RunState, call: &ToolCall) -> Result<ToolOutcome> {
    let outcome = match call {
        ToolCall::ReadFile { path } => {
            ToolOutcome::Done(files::read_file(&state.working_directory, call, path))
        }
        ToolCall::EditFile {
            path,
            instructions,
            create,
        } => ToolOutcome::Done(files::edit_file(
            rt,
            &state.working_directory,
            call,
            path,
            instructions,
            *create,
        )?),
        ToolCall::RunCommand { command } => {
            ToolOutcome::Done(shell::run_command(rt, state, call, command))
        }
        ToolCall::StartBackgroundService {
            command,
            session_suffix,
        } => ToolOutcome::Done(shell::start_background_service(
            rt,
            state,
            call,
            command,
            session_suffix.as_deref(),
        )),
        ToolCall::Wait { seconds, reason } => ToolOutcome::Done(shell::wait(
            call,
            *seconds,
            reason,
            rt.config.executor.max_wait_secs,
        )),
        ToolCall::AskUser { reason } => interaction::ask_user(rt, call, reason)?,
        ToolCall::WebSearch { query } => interaction::web_search(rt, state, call, query)?,
        ToolCall::UpdateProjectMetadata { project_id, path } => ToolOutcome::Done(
            project::update_project_metadata(rt, state, call, project_id, path),
        ),
        ToolCall::UpdateFileSummary { project_id, path } => ToolOutcome::Done(
            project::update_file_summary(rt, state, call, project_id, path)?,
        ),
    };
    if let ToolOutcome::Done(result) = &outcome {
        debug!(
            bytes = result.output_text.len(),
            side_effects = result.side_effects.len(),
            "tool finished"
        );
    }
    Ok(outcome)
}
