//! Terminal tools: `run_command`, `start_background_service`, `wait`.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::types::{SideEffect, ToolCall, ToolInvocationResult};
use crate::core::workdir::resolve_cd;
use crate::io::run_state::RunState;
use crate::runtime::Runtime;

fn command_result(message: &str, exit_code: i32) -> String {
    json!({ "message": message, "exit_code": exit_code }).to_string()
}

/// Type `command` into the primary session, wait for it to settle, and return what it printed.
///
/// A successful `cd` moves the run's working directory.
#[instrument(skip_all, fields(session = %state.session_name))]
pub fn run_command(
    rt: &Runtime<'_>,
    state: &mut RunState,
    call: &ToolCall,
    command: &str,
) -> ToolInvocationResult {
    if !rt.terminal.send_command(&state.session_name, command) {
        return ToolInvocationResult::new(
            call,
            command_result(
                &format!(
                    "An error occurred: could not deliver the command to session {}",
                    state.session_name
                ),
                -1,
            ),
        );
    }
    rt.terminal.settle();
    let output = rt.terminal.drain_output(&state.session_name);

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let Some(target) = resolve_cd(command, &output, &state.working_directory, home.as_deref())
    else {
        return ToolInvocationResult::new(call, command_result(&output, 0));
    };
    if !target.is_dir() {
        warn!(target = %target.display(), "cd target is not a directory");
        return ToolInvocationResult::new(
            call,
            command_result(
                &format!(
                    "An error occurred: {} is not a directory\n{output}",
                    target.display()
                ),
                -1,
            ),
        );
    }
    info!(from = %state.working_directory.display(), to = %target.display(), "working directory changed");
    state.working_directory = target.clone();
    ToolInvocationResult::new(call, command_result(&output, 0))
        .with_effect(SideEffect::DirectoryChanged { path: target })
}

/// Launch a long-running process in its own session.
#[instrument(skip_all, fields(suffix = ?suffix))]
pub fn start_background_service(
    rt: &Runtime<'_>,
    state: &mut RunState,
    call: &ToolCall,
    command: &str,
    suffix: Option<&str>,
) -> ToolInvocationResult {
    let name = match rt.terminal.start_service(
        &state.session_name,
        suffix,
        &state.working_directory,
        command,
    ) {
        Ok(name) => name,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to start background service");
            return ToolInvocationResult::new(
                call,
                format!("An error occurred while starting the service: {err:#}"),
            );
        }
    };
    if !state.background_sessions.contains(&name) {
        state.background_sessions.push(name.clone());
    }
    rt.terminal.settle();
    let output = rt.terminal.drain_output(&name);
    ToolInvocationResult::new(
        call,
        format!(
            "Started `{command}` in session {name} at {}. Output so far:\n{output}",
            state.working_directory.display()
        ),
    )
}

/// Sleep for `seconds`, capped at `max_secs`.
pub fn wait(call: &ToolCall, seconds: u64, reason: &str, max_secs: u64) -> ToolInvocationResult {
    let waited = seconds.min(max_secs);
    info!(seconds = waited, reason, "waiting");
    thread::sleep(Duration::from_secs(waited));
    let mut text = format!("Waited {waited} seconds ({reason}).");
    if waited < seconds {
        text.push_str(&format!(" Requested {seconds} seconds; the limit is {max_secs}."));
    }
    ToolInvocationResult::new(call, text)
}
