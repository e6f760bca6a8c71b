//! Shared deterministic types for the step runner.
//!
//! These types define stable contracts between the planner, the step executor
//! and the feedback analyzer, and mirror the JSON shapes the model returns.
//! They must not depend on external state or I/O.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// One atomic unit of a plan.
///
/// Steps are never edited after creation. A changed step is expressed by
/// replacing the plan tail after the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub detailed_description: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub pseudo_code: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub code_snippet: Option<String>,
    /// Position within the plan. Assigned by [`crate::core::plan::Plan`].
    #[serde(default)]
    pub order: usize,
}

impl Step {
    pub fn new(title: impl Into<String>, detailed_description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detailed_description: detailed_description.into(),
            pseudo_code: None,
            code_snippet: None,
            order: 0,
        }
    }

    /// Render the step as the prompt-facing description.
    pub fn describe(&self) -> String {
        let mut buf = format!("{}\n\n{}", self.title, self.detailed_description.trim());
        if let Some(pseudo) = &self.pseudo_code {
            buf.push_str(&format!("\n\nPseudo code:\n{}", pseudo.trim()));
        }
        if let Some(snippet) = &self.code_snippet {
            buf.push_str(&format!("\n\nCode snippet:\n{}", snippet.trim()));
        }
        buf
    }
}

/// Models asked to leave code fields empty send `""`; store that as absent.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Structured output of the planner (and of plan revisions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub steps: Vec<Step>,
}

/// Structured output of the file-rewrite contract used by `edit_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRewrite {
    pub updated_code: String,
}

/// Structured output of the file-summary contract used by `update_file_summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummaryResponse {
    pub summary: String,
}

/// What the feedback analyzer wants done with the remaining plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Revision {
    /// Keep the remaining steps as they are.
    Keep,
    /// Replace every step after the current one with `steps`.
    Replace,
    /// Drop every step after the current one (user asked to stop).
    Abort,
}

/// Structured output of the feedback analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub step_completed: bool,
    pub assessment: String,
    pub revision: Revision,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Normalized effect of a feedback response on the plan tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailChange {
    Keep,
    Replace(Vec<Step>),
}

impl FeedbackResponse {
    /// Only `abort` may empty the tail; `replace` without steps leaves it unchanged.
    pub fn tail_change(&self) -> TailChange {
        match self.revision {
            Revision::Keep => TailChange::Keep,
            Revision::Replace if self.steps.is_empty() => TailChange::Keep,
            Revision::Replace => TailChange::Replace(self.steps.clone()),
            Revision::Abort => TailChange::Replace(Vec::new()),
        }
    }
}

/// A single tool invocation requested by the model.
///
/// The palette is closed: every capability the executor can use is a variant
/// here with its inputs declared statically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile {
        path: String,
    },
    EditFile {
        path: String,
        instructions: String,
        #[serde(default)]
        create: bool,
    },
    RunCommand {
        command: String,
    },
    StartBackgroundService {
        command: String,
        #[serde(default)]
        session_suffix: Option<String>,
    },
    Wait {
        seconds: u64,
        reason: String,
    },
    AskUser {
        reason: String,
    },
    UpdateProjectMetadata {
        project_id: String,
        path: String,
    },
    UpdateFileSummary {
        project_id: String,
        path: String,
    },
    WebSearch {
        query: String,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::EditFile { .. } => "edit_file",
            ToolCall::RunCommand { .. } => "run_command",
            ToolCall::StartBackgroundService { .. } => "start_background_service",
            ToolCall::Wait { .. } => "wait",
            ToolCall::AskUser { .. } => "ask_user",
            ToolCall::UpdateProjectMetadata { .. } => "update_project_metadata",
            ToolCall::UpdateFileSummary { .. } => "update_file_summary",
            ToolCall::WebSearch { .. } => "web_search",
        }
    }

    /// Inputs as a JSON object without the `tool` tag.
    pub fn inputs(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("tool");
        }
        value
    }
}

/// What the executor model decided to do next within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnAction {
    Call { call: ToolCall },
    Finish { result: String },
}

/// Structured output of one executor turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorTurn {
    pub thought: String,
    pub action: TurnAction,
}

/// Observable consequence of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    FileChanged { path: PathBuf, created: bool },
    DirectoryChanged { path: PathBuf },
}

/// Record of one tool invocation, fed back to the model and the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub inputs: serde_json::Value,
    pub output_text: String,
    #[serde(default)]
    pub side_effects: Vec<SideEffect>,
}

impl ToolInvocationResult {
    pub fn new(call: &ToolCall, output_text: impl Into<String>) -> Self {
        Self {
            tool_name: call.name().to_string(),
            inputs: call.inputs(),
            output_text: output_text.into(),
            side_effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }
}

/// Why a step's tool-call sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStop {
    /// The model declared the step finished.
    Finished,
    /// The per-step tool-call ceiling was reached.
    ToolLimit,
}

/// Result of executing one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_index: usize,
    pub title: String,
    pub result: String,
    pub stop: ExecutionStop,
    pub trace: Vec<ToolInvocationResult>,
}

impl StepExecution {
    /// Full result text including the tool trace, as shown to the analyzer.
    pub fn render(&self) -> String {
        let mut buf = self.result.trim().to_string();
        if self.stop == ExecutionStop::ToolLimit {
            buf.push_str("\n[tool-call limit reached before the step was finished]");
        }
        for (i, entry) in self.trace.iter().enumerate() {
            buf.push_str(&format!(
                "\n\n#{} {} {}\n{}",
                i + 1,
                entry.tool_name,
                entry.inputs,
                entry.output_text.trim()
            ));
        }
        buf
    }

    pub fn changed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::new();
        let written = self
            .trace
            .iter()
            .flat_map(|entry| entry.side_effects.iter())
            .filter_map(|effect| match effect {
                SideEffect::FileChanged { path, .. } => Some(path),
                SideEffect::DirectoryChanged { .. } => None,
            });
        for path in written {
            if !files.contains(path) {
                files.push(path.clone());
            }
        }
        files
    }
}

/// One entry of the short-term feedback window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub step_index: usize,
    pub command: String,
    pub result: String,
}

/// Per-step audit record produced for history display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub title: String,
    pub execution_result: String,
    pub step_completed: bool,
    /// Files written by the step, in call order without repeats.
    #[serde(default)]
    pub changed_files: Vec<PathBuf>,
}
