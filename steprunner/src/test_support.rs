//! Test-only fakes for the runner's trait seams and a harness wiring them together.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{
    ExecutorTurn, FeedbackResponse, PlanResponse, Revision, Step, ToolCall, TurnAction,
};
use crate::io::config::{RunnerConfig, TypingMode};
use crate::io::events::{Event, EventSink};
use crate::io::human::{HumanChannel, Question, Reply};
use crate::io::init::RunnerPaths;
use crate::io::model::{Contract, ModelBackend, ModelRequest, StructuredModel};
use crate::io::plan_store::JsonPlanStore;
use crate::io::project::{JsonProjectStore, ProjectRecord};
use crate::io::prompt::PromptBuilder;
use crate::io::run_state::{RunSeed, RunState};
use crate::io::search::SearchProvider;
use crate::io::terminal::{Keys, Multiplexer, SessionManager};
use crate::looping::LoopContext;
use crate::runtime::Runtime;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Model backend answering from per-contract queues and recording every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<HashMap<Contract, VecDeque<String>>>,
    prompts: Mutex<Vec<(Contract, String)>>,
}

impl ScriptedModel {
    /// Queue `raw` as the next response for `contract`.
    pub fn push(&self, contract: Contract, raw: String) {
        lock(&self.responses)
            .entry(contract)
            .or_default()
            .push_back(raw);
    }

    /// Prompts received under `contract`, oldest first.
    pub fn prompts(&self, contract: Contract) -> Vec<String> {
        lock(&self.prompts)
            .iter()
            .filter(|(c, _)| *c == contract)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

impl ModelBackend for ScriptedModel {
    fn invoke(&self, request: &ModelRequest) -> Result<String> {
        lock(&self.prompts).push((request.contract, request.prompt.clone()));
        lock(&self.responses)
            .get_mut(&request.contract)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted response for {}", request.contract.as_str()))
    }
}

/// Multiplexer calls observed by [`FakeMultiplexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxCall {
    NewSession(String),
    Pipe(String),
    Command { session: String, command: String },
    Kill(String),
}

#[derive(Default)]
struct FakeMuxState {
    live: HashSet<String>,
    logs: HashMap<String, PathBuf>,
    typed: HashMap<String, String>,
    responses: HashMap<String, String>,
    calls: Vec<MuxCall>,
}

/// In-memory multiplexer. Entered commands append their scripted output to the piped log.
#[derive(Default)]
pub struct FakeMultiplexer {
    state: Mutex<FakeMuxState>,
}

impl FakeMultiplexer {
    /// Output printed when `command` is entered in any session.
    pub fn respond(&self, command: &str, output: &str) {
        lock(&self.state)
            .responses
            .insert(command.to_string(), output.to_string());
    }

    /// Pretend a session already exists (e.g. left over from an earlier process).
    pub fn add_live(&self, name: &str) {
        lock(&self.state).live.insert(name.to_string());
    }

    pub fn is_live(&self, name: &str) -> bool {
        lock(&self.state).live.contains(name)
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        lock(&self.state).calls.clone()
    }

    /// Commands entered in `session`, in order.
    pub fn commands(&self, session: &str) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                MuxCall::Command { session: s, command } if s == session => Some(command.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Multiplexer for FakeMultiplexer {
    fn new_session(&self, name: &str, _workdir: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.live.insert(name.to_string()) {
            return Err(anyhow!("duplicate session: {name}"));
        }
        state.calls.push(MuxCall::NewSession(name.to_string()));
        Ok(())
    }

    fn pipe_output(&self, name: &str, log_path: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        state.logs.insert(name.to_string(), log_path.to_path_buf());
        state.calls.push(MuxCall::Pipe(name.to_string()));
        Ok(())
    }

    fn send_keys(&self, name: &str, keys: Keys<'_>) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.live.contains(name) {
            return Err(anyhow!("can't find session: {name}"));
        }
        match keys {
            Keys::Literal(text) => {
                state.typed.entry(name.to_string()).or_default().push_str(text);
            }
            Keys::Enter => {
                let command = state.typed.remove(name).unwrap_or_default();
                let output = state.responses.get(&command).cloned().unwrap_or_default();
                state.calls.push(MuxCall::Command {
                    session: name.to_string(),
                    command,
                });
                if let Some(log) = state.logs.get(name)
                    && !output.is_empty()
                {
                    let mut file = OpenOptions::new().append(true).create(true).open(log)?;
                    file.write_all(output.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn has_session(&self, name: &str) -> Result<bool> {
        Ok(self.is_live(name))
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.live.remove(name);
        state.logs.remove(name);
        state.calls.push(MuxCall::Kill(name.to_string()));
        Ok(())
    }
}

/// Event sink keeping everything in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Human channel replaying scripted replies; answers `Pending` once they run out.
#[derive(Default)]
pub struct ScriptedHuman {
    replies: RefCell<VecDeque<Reply>>,
    asked: RefCell<Vec<Question>>,
}

impl ScriptedHuman {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            asked: RefCell::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<Question> {
        self.asked.borrow().clone()
    }
}

impl HumanChannel for ScriptedHuman {
    fn ask(&self, question: &Question) -> Result<Reply> {
        self.asked.borrow_mut().push(question.clone());
        Ok(self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Reply::Pending))
    }
}

/// Search provider returning a fixed answer, or unconfigured when `None`.
#[derive(Debug, Default)]
pub struct StaticSearch {
    pub answer: Option<String>,
}

impl SearchProvider for StaticSearch {
    fn is_configured(&self) -> bool {
        self.answer.is_some()
    }

    fn search(&self, query: &str) -> Result<String> {
        self.answer
            .as_ref()
            .map(|answer| format!("{query}: {answer}"))
            .ok_or_else(|| anyhow!("search is not configured"))
    }
}

/// A temporary project ("shop") with fakes behind every seam.
pub struct Harness {
    _dir: TempDir,
    root: PathBuf,
    project_context: String,
    pub config: RunnerConfig,
    pub paths: RunnerPaths,
    pub model: ScriptedModel,
    pub mux: Arc<FakeMultiplexer>,
    pub terminal: SessionManager,
    pub events: RecordingSink,
    pub plans: JsonPlanStore,
    pub projects: JsonProjectStore,
    pub search: StaticSearch,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        let paths = RunnerPaths::new(&root);

        let mut config = RunnerConfig::default();
        config.terminal.typing = TypingMode::PerCharacter;
        config.terminal.inter_char_delay_ms = 0;
        config.terminal.settle_delay_ms = 150;
        config.terminal.tail_poll_interval_ms = 5;
        config.terminal.log_dir = Some(root.join(".steprunner").join("logs"));
        config.model.max_retries = 0;

        let projects = JsonProjectStore::new(&paths.project_path);
        let record = ProjectRecord {
            id: "shop".to_string(),
            name: "shop".to_string(),
            root_path: root.clone(),
            tree: String::new(),
            summary: "A small web shop.".to_string(),
            files: Default::default(),
        };
        projects.save(&record).expect("save project");

        let mux = Arc::new(FakeMultiplexer::default());
        let terminal = SessionManager::new(
            Arc::clone(&mux) as Arc<dyn Multiplexer>,
            config.terminal.clone(),
        );
        Self {
            project_context: record.planner_context(),
            plans: JsonPlanStore::new(&paths.plans_dir),
            _dir: dir,
            root,
            config,
            paths,
            model: ScriptedModel::default(),
            mux,
            terminal,
            events: RecordingSink::default(),
            projects,
            search: StaticSearch::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh run state rooted at the project with a deterministic session name.
    pub fn run_state(&self, run_id: &str) -> RunState {
        RunState::new(RunSeed {
            run_id: run_id.to_string(),
            user_query: "add a login page".to_string(),
            change_request: None,
            image: None,
            project_id: "shop".to_string(),
            working_directory: self.root.clone(),
            session_name: format!("shop-{run_id}"),
            history_token_budget: self.config.executor.history_token_budget,
        })
    }

    /// Start the state's primary session.
    pub fn start_session(&self, state: &mut RunState) {
        let (_, name) = self
            .terminal
            .start_session(
                Some(&state.session_name),
                &state.project_id,
                &state.working_directory,
            )
            .expect("start session");
        state.session_name = name;
    }

    pub fn loop_context(&self) -> LoopContext<'_> {
        LoopContext {
            paths: &self.paths,
            plans: &self.plans,
            project_context: &self.project_context,
        }
    }

    /// Run `f` against a runtime built from the harness and `human`.
    pub fn with_runtime<R>(
        &self,
        human: &dyn HumanChannel,
        f: impl FnOnce(&Runtime<'_>) -> R,
    ) -> R {
        let model = StructuredModel::with_retries(&self.model, 0, Duration::ZERO);
        let prompts =
            PromptBuilder::new(self.config.model.prompt_budget_bytes).expect("prompt templates");
        let rt = Runtime {
            config: &self.config,
            model: &model,
            prompts: &prompts,
            terminal: &self.terminal,
            human,
            search: &self.search,
            projects: &self.projects,
            events: &self.events,
        };
        f(&rt)
    }
}

/// Planner output with one step per title (description = title).
pub fn plan_json(titles: &[&str]) -> String {
    let response = PlanResponse {
        steps: steps(titles),
    };
    serde_json::to_string(&response).expect("serialize plan")
}

/// Executor turn calling `call`.
pub fn call_json(call: &ToolCall) -> String {
    let turn = ExecutorTurn {
        thought: format!("use {}", call.name()),
        action: TurnAction::Call { call: call.clone() },
    };
    serde_json::to_string(&turn).expect("serialize turn")
}

/// Executor turn finishing the step with `result`.
pub fn finish_json(result: &str) -> String {
    let turn = ExecutorTurn {
        thought: "done".to_string(),
        action: TurnAction::Finish {
            result: result.to_string(),
        },
    };
    serde_json::to_string(&turn).expect("serialize turn")
}

/// Feedback analyzer output; `titles` become the replacement tail.
pub fn feedback_json(step_completed: bool, revision: Revision, titles: &[&str]) -> String {
    let response = FeedbackResponse {
        step_completed,
        assessment: "checked the step result".to_string(),
        revision,
        steps: steps(titles),
    };
    serde_json::to_string(&response).expect("serialize feedback")
}

fn steps(titles: &[&str]) -> Vec<Step> {
    titles.iter().map(|title| Step::new(*title, *title)).collect()
}
