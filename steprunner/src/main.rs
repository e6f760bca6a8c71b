//! Autonomous step runner CLI.
//!
//! Plans a user request against the project in `--root`, executes the plan
//! step by step through a tmux session, and persists every run under
//! `.steprunner/runs/` so suspended runs can be resumed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use steprunner::agents::planner::{PlanRequest, PlanningOutcome, draft_plan, plan_with_review};
use steprunner::core::types::Step;
use steprunner::exit_codes;
use steprunner::io::config::{RunnerConfig, load_config};
use steprunner::io::events::JsonlEventLog;
use steprunner::io::human::{ConsoleChannel, DeferredChannel, HumanChannel, PreloadedChannel};
use steprunner::io::init::{InitOptions, RunnerPaths, init_project};
use steprunner::io::model::{CommandModel, StructuredModel};
use steprunner::io::plan_store::{JsonPlanStore, PlanStore};
use steprunner::io::project::{JsonProjectStore, ProjectRecord, ProjectStore};
use steprunner::io::prompt::PromptBuilder;
use steprunner::io::run_state::{RunState, load_run_state};
use steprunner::io::search::CommandSearch;
use steprunner::io::terminal::{SessionManager, Tmux};
use steprunner::io::tree::filtered_tree;
use steprunner::looping::{LoopContext, RunOutcome, run_loop};
use steprunner::runtime::Runtime;
use steprunner::start::{StartContext, StartRequest, resume_run, start_run};

#[derive(Parser)]
#[command(
    name = "steprunner",
    version,
    about = "Plan, execute and review coding tasks step by step"
)]
struct Cli {
    /// Project root (the directory holding `.steprunner/`).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.steprunner/` with a default config and project record.
    Init {
        /// Project name; defaults to the root directory name.
        #[arg(long)]
        name: Option<String>,
        /// File whose contents become the project summary handed to the planner.
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the filtered directory tree of `path` (default: the project root).
    Tree { path: Option<PathBuf> },
    /// Draft (and review) a plan without executing it.
    Plan {
        query: String,
        /// Save the accepted plan under this change-request id.
        #[arg(long)]
        change_request: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Accept the first draft without review.
        #[arg(long)]
        yes: bool,
    },
    /// Start a new run for `query`.
    Run {
        query: String,
        #[arg(long)]
        change_request: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Primary tmux session name; derived from the project id when absent.
        #[arg(long)]
        session: Option<String>,
        /// Answer questions on stdin instead of suspending the run.
        #[arg(short, long)]
        interactive: bool,
    },
    /// Continue a suspended or interrupted run.
    Resume {
        run_id: String,
        /// Answer to the question the run is waiting on.
        #[arg(long)]
        answer: Option<String>,
        #[arg(short, long)]
        interactive: bool,
    },
    /// Print the phase, progress and pending question of a run.
    Status { run_id: String },
    /// Kill a tmux session (exit code 3 if it does not exist).
    KillSession { name: String },
}

fn main() {
    steprunner::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(err = %format!("{err:#}"), "command failed");
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init {
            name,
            summary,
            force,
        } => cmd_init(&cli.root, name, summary, force),
        Command::Tree { path } => cmd_tree(&cli.root, path.as_deref()),
        Command::Plan {
            query,
            change_request,
            image,
            yes,
        } => cmd_plan(&cli.root, &query, change_request.as_deref(), image, yes),
        Command::Run {
            query,
            change_request,
            image,
            session,
            interactive,
        } => cmd_run(
            &cli.root,
            StartRequest {
                query,
                change_request,
                image,
                session,
            },
            interactive,
        ),
        Command::Resume {
            run_id,
            answer,
            interactive,
        } => cmd_resume(&cli.root, &run_id, answer, interactive),
        Command::Status { run_id } => cmd_status(&cli.root, &run_id),
        Command::KillSession { name } => cmd_kill_session(&cli.root, &name),
    }
}

/// Loaded `.steprunner/` layout of an initialized project.
struct Workspace {
    paths: RunnerPaths,
    config: RunnerConfig,
    projects: JsonProjectStore,
    project: ProjectRecord,
}

impl Workspace {
    fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {}", root.display()))?;
        let paths = RunnerPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let projects = JsonProjectStore::new(&paths.project_path);
        let project = projects.load()?;
        Ok(Self {
            paths,
            config,
            projects,
            project,
        })
    }

    fn terminal(&self) -> SessionManager {
        SessionManager::new(Arc::new(Tmux::default()), self.config.terminal.clone())
    }
}

fn cmd_init(
    root: &Path,
    name: Option<String>,
    summary: Option<PathBuf>,
    force: bool,
) -> Result<i32> {
    let name = match name {
        Some(name) => name,
        None => root
            .canonicalize()
            .with_context(|| format!("project root {}", root.display()))?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string()),
    };
    let summary = summary
        .map(|path| {
            fs::read_to_string(&path).with_context(|| format!("read summary {}", path.display()))
        })
        .transpose()?;
    let record = init_project(
        root,
        &InitOptions {
            name,
            summary,
            force,
        },
    )?;
    println!("initialized project {} at {}", record.id, record.root_path.display());
    Ok(exit_codes::OK)
}

fn cmd_tree(root: &Path, path: Option<&Path>) -> Result<i32> {
    let config = load_config(&RunnerPaths::new(root).config_path)?;
    let target = path.unwrap_or(root);
    let target = target
        .canonicalize()
        .with_context(|| format!("tree root {}", target.display()))?;
    print!("{}", filtered_tree(&target, &config.tree)?);
    Ok(exit_codes::OK)
}

fn cmd_plan(
    root: &Path,
    query: &str,
    change_request: Option<&str>,
    image: Option<PathBuf>,
    yes: bool,
) -> Result<i32> {
    let ws = Workspace::open(root)?;
    let terminal = ws.terminal();
    let console = ConsoleChannel::stdio();
    let project_context = ws.project.planner_context();
    let req = PlanRequest {
        request: query,
        project: &project_context,
        image: image.as_deref(),
        workdir: &ws.project.root_path,
    };
    let outcome = with_runtime(&ws, &terminal, &console, None, |rt| {
        if yes {
            return Ok(PlanningOutcome::Accepted(draft_plan(rt, &req)?));
        }
        plan_with_review(rt, &req, &mut None)
    })?;
    let PlanningOutcome::Accepted(steps) = outcome else {
        return Ok(exit_codes::NEEDS_INPUT);
    };
    if let Some(change_request) = change_request {
        JsonPlanStore::new(&ws.paths.plans_dir).save(change_request, &steps)?;
    }
    print_steps(&steps);
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, req: StartRequest, interactive: bool) -> Result<i32> {
    let ws = Workspace::open(root)?;
    let terminal = ws.terminal();
    let plans = JsonPlanStore::new(&ws.paths.plans_dir);
    let ctx = StartContext {
        paths: &ws.paths,
        config: &ws.config,
        terminal: &terminal,
        plans: &plans,
    };
    let mut state = start_run(&ctx, &ws.project, &req)?;
    println!("run {} in session {}", state.run_id, state.session_name);

    let code = if interactive {
        drive(&ws, &terminal, &ConsoleChannel::stdio(), &mut state)
    } else {
        drive(&ws, &terminal, &DeferredChannel, &mut state)
    };
    terminal.shutdown();
    code
}

fn cmd_resume(root: &Path, run_id: &str, answer: Option<String>, interactive: bool) -> Result<i32> {
    let ws = Workspace::open(root)?;
    let terminal = ws.terminal();
    let mut state = resume_run(&ws.paths, &terminal, run_id)?;

    let code = if interactive {
        let console = ConsoleChannel::stdio();
        drive(&ws, &terminal, &PreloadedChannel::new(answer, &console), &mut state)
    } else {
        drive(&ws, &terminal, &PreloadedChannel::new(answer, &DeferredChannel), &mut state)
    };
    terminal.shutdown();
    code
}

fn cmd_status(root: &Path, run_id: &str) -> Result<i32> {
    let ws = Workspace::open(root)?;
    let state = load_run_state(&ws.paths.run_state_path(run_id))?;
    println!("run:      {}", state.run_id);
    println!("phase:    {}", state.phase.as_str());
    println!("progress: {}/{}", state.plan.cursor(), state.plan.len());
    println!("session:  {}", state.session_name);
    println!("workdir:  {}", state.working_directory.display());
    if let Some(question) = &state.pending {
        println!("\nwaiting for input:\n{}", question.prompt);
        return Ok(exit_codes::NEEDS_INPUT);
    }
    Ok(exit_codes::OK)
}

fn cmd_kill_session(root: &Path, name: &str) -> Result<i32> {
    let config = load_config(&RunnerPaths::new(root).config_path)?;
    let terminal = SessionManager::new(Arc::new(Tmux::default()), config.terminal);
    if terminal.kill_session(name)? {
        println!("killed session {name}");
        Ok(exit_codes::OK)
    } else {
        eprintln!("no session named {name}");
        Ok(exit_codes::SESSION_NOT_FOUND)
    }
}

/// Run the control loop for `state` and report how it ended.
fn drive(
    ws: &Workspace,
    terminal: &SessionManager,
    human: &dyn HumanChannel,
    state: &mut RunState,
) -> Result<i32> {
    let events = JsonlEventLog::new(ws.paths.events_path(&state.run_id));
    let plans = JsonPlanStore::new(&ws.paths.plans_dir);
    let project_context = ws.project.planner_context();
    let ctx = LoopContext {
        paths: &ws.paths,
        plans: &plans,
        project_context: &project_context,
    };
    let outcome = with_runtime(ws, terminal, human, Some(&events), |rt| {
        run_loop(rt, state, &ctx, |record| {
            let status = if record.step_completed {
                "done"
            } else {
                "incomplete"
            };
            println!("step {} [{status}] {}", record.index + 1, record.title);
            for path in &record.changed_files {
                println!("  changed {}", path.display());
            }
        })
    })?;
    match outcome {
        RunOutcome::Completed { steps_executed } => {
            println!("run complete: {steps_executed} steps executed");
            Ok(exit_codes::OK)
        }
        RunOutcome::NeedsInput { run_id, question } => {
            println!("\n{}\n", question.prompt.trim_end());
            println!("resume with: steprunner resume {run_id} --answer <text>");
            Ok(exit_codes::NEEDS_INPUT)
        }
    }
}

fn with_runtime<R>(
    ws: &Workspace,
    terminal: &SessionManager,
    human: &dyn HumanChannel,
    events: Option<&JsonlEventLog>,
    f: impl FnOnce(&Runtime<'_>) -> Result<R>,
) -> Result<R> {
    let backend = CommandModel::from_config(&ws.config.model);
    let model = StructuredModel::new(&backend, &ws.config.model);
    let prompts = PromptBuilder::new(ws.config.model.prompt_budget_bytes)?;
    let search = CommandSearch::from_config(&ws.config.search);
    let scratch_events;
    let events = match events {
        Some(events) => events,
        None => {
            scratch_events = JsonlEventLog::new(ws.paths.runner_dir.join("plan-events.jsonl"));
            &scratch_events
        }
    };
    let rt = Runtime {
        config: &ws.config,
        model: &model,
        prompts: &prompts,
        terminal,
        human,
        search: &search,
        projects: &ws.projects,
        events,
    };
    f(&rt)
}

fn print_steps(steps: &[Step]) {
    for step in steps {
        println!("{}. {}", step.order + 1, step.title);
        for line in step.detailed_description.lines() {
            println!("   {line}");
        }
    }
}
