//! Orchestration for starting and resuming runs.
//!
//! A "run" is one pass of the agent over a user request, identified by a
//! stable `run_id`. Starting a run opens (or re-attaches) the primary terminal
//! session and persists the initial state under `.steprunner/runs/<run-id>/`.
//! Resuming reloads that state and re-attaches the run's sessions.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::machine::after_planning;
use crate::core::plan::Plan;
use crate::io::config::RunnerConfig;
use crate::io::events::{Event, EventSink, JsonlEventLog};
use crate::io::init::RunnerPaths;
use crate::io::plan_store::PlanStore;
use crate::io::project::ProjectRecord;
use crate::io::run_state::{RunSeed, RunState, load_run_state, write_run_state};
use crate::io::terminal::SessionManager;

/// Inputs of `steprunner run`.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub query: String,
    /// Stored plans are looked up and saved under this id.
    pub change_request: Option<String>,
    pub image: Option<PathBuf>,
    /// Explicit primary session name; derived from the project id when absent.
    pub session: Option<String>,
}

/// Everything `start_run` touches besides the request.
pub struct StartContext<'a> {
    pub paths: &'a RunnerPaths,
    pub config: &'a RunnerConfig,
    pub terminal: &'a SessionManager,
    pub plans: &'a dyn PlanStore,
}

/// First free `run-<secs>` id (suffixed `-2`, `-3`, ... on collision).
pub fn allocate_run_id(paths: &RunnerPaths, now_secs: u64) -> Result<String> {
    let base = format!("run-{now_secs}");
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !paths.run_dir(&id).exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "unable to allocate a run id from base '{base}' (too many existing runs)"
    ))
}

/// Start a new run for `req` against `project`.
///
/// - Fails if the project root no longer exists or the image is missing.
/// - Opens the primary session in the project root and records `session_started`.
/// - Skips planning when a plan is stored under the change request.
pub fn start_run(
    ctx: &StartContext<'_>,
    project: &ProjectRecord,
    req: &StartRequest,
) -> Result<RunState> {
    if req.query.trim().is_empty() {
        return Err(anyhow!("empty request"));
    }
    if !project.root_path.is_dir() {
        return Err(anyhow!(
            "project root does not exist: {}",
            project.root_path.display()
        ));
    }
    if let Some(image) = &req.image
        && !image.is_file()
    {
        return Err(anyhow!("image not found: {}", image.display()));
    }

    let run_id = allocate_run_id(ctx.paths, unix_secs())?;
    debug!(run_id = %run_id, root = %project.root_path.display(), "starting run");
    let (workdir, session) = ctx
        .terminal
        .start_session(req.session.as_deref(), &project.id, &project.root_path)
        .context("start primary session")?;
    JsonlEventLog::new(ctx.paths.events_path(&run_id)).emit(&Event::SessionStarted {
        session: session.clone(),
        workdir: workdir.clone(),
    })?;

    let mut state = RunState::new(RunSeed {
        run_id: run_id.clone(),
        user_query: req.query.trim().to_string(),
        change_request: req.change_request.clone(),
        image: req.image.clone(),
        project_id: project.id.clone(),
        working_directory: workdir,
        session_name: session,
        history_token_budget: ctx.config.executor.history_token_budget,
    });
    if let Some(change_request) = &req.change_request
        && let Some(steps) = ctx.plans.load(change_request)?
    {
        info!(change_request = %change_request, steps = steps.len(), "using stored plan");
        state.plan = Plan::new(steps);
        state.phase = after_planning(&state.plan);
    }

    write_run_state(&ctx.paths.run_state_path(&run_id), &state)?;
    info!(run_id = %run_id, session = %state.session_name, "run started");
    Ok(state)
}

/// Reload a persisted run and re-attach its sessions.
///
/// The primary session is recreated if it has gone away. Background sessions
/// that no longer exist are dropped from the state.
pub fn resume_run(paths: &RunnerPaths, terminal: &SessionManager, run_id: &str) -> Result<RunState> {
    let path = paths.run_state_path(run_id);
    if !path.exists() {
        return Err(anyhow!("unknown run '{run_id}' (missing {})", path.display()));
    }
    let mut state = load_run_state(&path)?;
    if state.terminated() {
        return Err(anyhow!("run '{run_id}' already completed"));
    }

    let (_, session) = terminal
        .start_session(
            Some(&state.session_name),
            &state.project_id,
            &state.working_directory,
        )
        .context("re-attach primary session")?;
    state.session_name = session;

    let mut alive = Vec::with_capacity(state.background_sessions.len());
    for name in std::mem::take(&mut state.background_sessions) {
        if terminal.session_exists(&name)? {
            terminal
                .start_session(Some(&name), &state.project_id, &state.working_directory)
                .with_context(|| format!("re-attach session {name}"))?;
            alive.push(name);
        } else {
            warn!(session = %name, "background session is gone");
        }
    }
    state.background_sessions = alive;

    write_run_state(&path, &state)?;
    info!(run_id = %run_id, phase = state.phase.as_str(), "run resumed");
    Ok(state)
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
