//! Structured model invocation.
//!
//! [`ModelBackend`] runs one raw invocation (currently a `codex exec`-style CLI);
//! [`StructuredModel`] layers schema validation, parsing, and the retry policy on
//! top. Tests use scripted backends that return canned messages per contract.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));
const EXECUTOR_TURN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/executor_turn.schema.json"
));
const FEEDBACK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/feedback.schema.json"
));
const FILE_REWRITE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/file_rewrite.schema.json"
));
const FILE_SUMMARY_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/file_summary.schema.json"
));

/// Output contract of one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    Plan,
    ExecutorTurn,
    Feedback,
    FileRewrite,
    FileSummary,
}

impl Contract {
    pub fn as_str(self) -> &'static str {
        match self {
            Contract::Plan => "plan",
            Contract::ExecutorTurn => "executor_turn",
            Contract::Feedback => "feedback",
            Contract::FileRewrite => "file_rewrite",
            Contract::FileSummary => "file_summary",
        }
    }

    pub fn schema(self) -> &'static str {
        match self {
            Contract::Plan => PLAN_SCHEMA,
            Contract::ExecutorTurn => EXECUTOR_TURN_SCHEMA,
            Contract::Feedback => FEEDBACK_SCHEMA,
            Contract::FileRewrite => FILE_REWRITE_SCHEMA,
            Contract::FileSummary => FILE_SUMMARY_SCHEMA,
        }
    }
}

/// Parameters for one backend invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub contract: Contract,
    pub prompt: String,
    /// Working directory for the backend process.
    pub workdir: PathBuf,
    /// JSON Schema file the backend must satisfy.
    pub schema_path: PathBuf,
    /// Where the backend writes its final message.
    pub output_path: PathBuf,
    pub image: Option<PathBuf>,
}

/// Abstraction over model backends.
pub trait ModelBackend {
    /// Run the model and return its raw final message.
    fn invoke(&self, request: &ModelRequest) -> Result<String>;
}

/// Backend that spawns a structured-output CLI.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl ModelBackend for CommandModel {
    #[instrument(skip_all, fields(contract = request.contract.as_str(), timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, request: &ModelRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-schema")
            .arg(&request.schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path);
        if let Some(image) = &request.image {
            cmd.arg("--image").arg(image);
        }
        cmd.arg("-").current_dir(&request.workdir);

        info!(workdir = %request.workdir.display(), "invoking model");
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run model command")?;

        if output.timed_out {
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                tail(stderr.trim(), 2_000)
            ));
        }
        if !request.output_path.exists() {
            return Err(anyhow!(
                "model command wrote no output to {}",
                request.output_path.display()
            ));
        }
        fs::read_to_string(&request.output_path)
            .with_context(|| format!("read model output {}", request.output_path.display()))
    }
}

/// The single failure type of structured model calls.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{contract} model invocation failed: {message}")]
    Backend {
        contract: &'static str,
        message: String,
    },
    #[error("{contract} model output is not valid JSON: {message}")]
    Unparsable {
        contract: &'static str,
        message: String,
    },
    #[error("{contract} model output violates its schema: {message}")]
    Schema {
        contract: &'static str,
        message: String,
    },
}

/// Schema-checked model calls with a bounded retry policy.
pub struct StructuredModel<'a> {
    backend: &'a dyn ModelBackend,
    max_retries: u32,
    retry_delay: Duration,
}

impl<'a> StructuredModel<'a> {
    pub fn new(backend: &'a dyn ModelBackend, cfg: &ModelConfig) -> Self {
        Self::with_retries(
            backend,
            cfg.max_retries,
            Duration::from_millis(cfg.retry_delay_ms),
        )
    }

    pub fn with_retries(
        backend: &'a dyn ModelBackend,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            backend,
            max_retries,
            retry_delay,
        }
    }

    /// Invoke the model under `contract` and deserialize its validated output.
    #[instrument(skip_all, fields(contract = contract.as_str(), has_image = image.is_some()))]
    pub fn invoke<T: DeserializeOwned>(
        &self,
        contract: Contract,
        prompt: &str,
        workdir: &Path,
        image: Option<&Path>,
    ) -> Result<T, ModelError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(contract, prompt, workdir, image) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries = self.max_retries, err = %err, "retrying model call");
                    thread::sleep(self.retry_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt<T: DeserializeOwned>(
        &self,
        contract: Contract,
        prompt: &str,
        workdir: &Path,
        image: Option<&Path>,
    ) -> Result<T, ModelError> {
        let backend_err = |message: String| ModelError::Backend {
            contract: contract.as_str(),
            message,
        };
        let scratch = tempfile::Builder::new()
            .prefix("steprunner-model-")
            .tempdir()
            .map_err(|e| backend_err(format!("create scratch dir: {e}")))?;
        let schema_path = scratch
            .path()
            .join(format!("{}.schema.json", contract.as_str()));
        fs::write(&schema_path, contract.schema())
            .map_err(|e| backend_err(format!("write schema: {e}")))?;

        let request = ModelRequest {
            contract,
            prompt: prompt.to_string(),
            workdir: workdir.to_path_buf(),
            schema_path,
            output_path: scratch.path().join("last_message.json"),
            image: image.map(Path::to_path_buf),
        };
        let raw = self
            .backend
            .invoke(&request)
            .map_err(|e| backend_err(format!("{e:#}")))?;
        debug!(bytes = raw.len(), "model returned");
        parse_structured(contract, &raw)
    }
}

/// Parse `raw` as JSON, validate it against the contract schema, and deserialize it.
pub fn parse_structured<T: DeserializeOwned>(contract: Contract, raw: &str) -> Result<T, ModelError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| ModelError::Unparsable {
        contract: contract.as_str(),
        message: e.to_string(),
    })?;

    let schema_err = |message: String| ModelError::Schema {
        contract: contract.as_str(),
        message,
    };
    let schema: Value = serde_json::from_str(contract.schema())
        .map_err(|e| schema_err(format!("embedded schema is invalid JSON: {e}")))?;
    let validator =
        validator_for(&schema).map_err(|e| schema_err(format!("invalid schema: {e}")))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(schema_err(messages.join("; ")));
    }

    serde_json::from_value(value).map_err(|e| schema_err(e.to_string()))
}

/// Drop a surrounding Markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("...{skipped}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutorTurn, FileRewrite, PlanResponse, ToolCall, TurnAction};
    use std::cell::{Cell, RefCell};

    struct FlakyBackend {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
        output: String,
        seen_schema: RefCell<Option<String>>,
    }

    impl FlakyBackend {
        fn new(failures: u32, output: &str) -> Self {
            Self {
                failures_left: Cell::new(failures),
                calls: Cell::new(0),
                output: output.to_string(),
                seen_schema: RefCell::new(None),
            }
        }
    }

    impl ModelBackend for FlakyBackend {
        fn invoke(&self, request: &ModelRequest) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            *self.seen_schema.borrow_mut() = fs::read_to_string(&request.schema_path).ok();
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(anyhow!("backend unavailable"));
            }
            Ok(self.output.clone())
        }
    }

    /// Verifies fenced output is unwrapped before parsing.
    #[test]
    fn parses_fenced_plan() {
        let raw = "```json\n{\"steps\":[{\"title\":\"Add model\",\"detailed_description\":\"d\",\"pseudo_code\":null,\"code_snippet\":\"\",\"order\":0}]}\n```";
        let plan: PlanResponse = parse_structured(Contract::Plan, raw).expect("parse");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].code_snippet, None);
    }

    #[test]
    fn schema_violation_is_reported() {
        let err = parse_structured::<PlanResponse>(Contract::Plan, r#"{"steps":"nope"}"#)
            .expect_err("schema");
        assert!(matches!(err, ModelError::Schema { contract: "plan", .. }));
    }

    #[test]
    fn non_json_is_unparsable() {
        let err = parse_structured::<FileRewrite>(Contract::FileRewrite, "sure, here you go")
            .expect_err("unparsable");
        assert!(matches!(err, ModelError::Unparsable { .. }));
    }

    #[test]
    fn executor_turn_schema_accepts_tool_call() {
        let raw = r#"{"thought":"look first","action":{"type":"call","call":{"tool":"edit_file","path":"app.py","instructions":"add route","create":false}}}"#;
        let turn: ExecutorTurn = parse_structured(Contract::ExecutorTurn, raw).expect("parse");
        assert!(matches!(
            turn.action,
            TurnAction::Call {
                call: ToolCall::EditFile { .. }
            }
        ));
    }

    #[test]
    fn executor_turn_schema_accepts_file_summary_call() {
        let raw = r#"{"thought":"record it","action":{"type":"call","call":{"tool":"update_file_summary","project_id":"shop","path":"app/views.py"}}}"#;
        let turn: ExecutorTurn = parse_structured(Contract::ExecutorTurn, raw).expect("parse");
        let TurnAction::Call { call } = turn.action else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name(), "update_file_summary");
        assert_eq!(call.inputs()["path"], "app/views.py");
    }

    /// Verifies the default policy fails fast after one backend error.
    #[test]
    fn zero_retries_fails_fast() {
        let backend = FlakyBackend::new(1, r#"{"updated_code":"x"}"#);
        let model = StructuredModel::with_retries(&backend, 0, Duration::ZERO);
        let temp = tempfile::tempdir().expect("tempdir");
        let err = model
            .invoke::<FileRewrite>(Contract::FileRewrite, "p", temp.path(), None)
            .expect_err("should fail");
        assert!(matches!(err, ModelError::Backend { .. }));
        assert_eq!(backend.calls.get(), 1);
    }

    #[test]
    fn retries_until_success_within_budget() {
        let backend = FlakyBackend::new(2, r#"{"updated_code":"print('hi')\n"}"#);
        let model = StructuredModel::with_retries(&backend, 2, Duration::ZERO);
        let temp = tempfile::tempdir().expect("tempdir");
        let out: FileRewrite = model
            .invoke(Contract::FileRewrite, "p", temp.path(), None)
            .expect("invoke");
        assert_eq!(out.updated_code, "print('hi')\n");
        assert_eq!(backend.calls.get(), 3);
        let schema = backend.seen_schema.borrow().clone().expect("schema written");
        assert!(schema.contains("updated_code"));
    }

    #[cfg(unix)]
    #[test]
    fn command_model_reads_last_message_file() {
        let script = r#"while [ $# -gt 0 ]; do if [ "$1" = "--output-last-message" ]; then out="$2"; fi; shift; done; cat > /dev/null; printf '{"updated_code":"ok"}' > "$out""#;
        let cfg = ModelConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
            ],
            ..ModelConfig::default()
        };
        let backend = CommandModel::from_config(&cfg);
        let model = StructuredModel::new(&backend, &cfg);
        let temp = tempfile::tempdir().expect("tempdir");
        let out: FileRewrite = model
            .invoke(Contract::FileRewrite, "rewrite", temp.path(), None)
            .expect("invoke");
        assert_eq!(out.updated_code, "ok");
    }
}
