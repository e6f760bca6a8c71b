//! Runner configuration stored under `.steprunner/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the reference agent used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunnerConfig {
    pub terminal: TerminalConfig,
    pub model: ModelConfig,
    pub executor: ExecutorConfig,
    pub tree: TreeConfig,
    pub search: SearchConfig,
}

/// How a command is delivered to the terminal session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypingMode {
    /// One keystroke per character with `inter_char_delay_ms` between them.
    PerCharacter,
    /// The whole command as one literal `send-keys`.
    Atomic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalConfig {
    pub typing: TypingMode,
    pub inter_char_delay_ms: u64,
    /// Fixed wait between sending a command and draining its output.
    pub settle_delay_ms: u64,
    /// Sleep of the log-tailing thread when no new output is available.
    pub tail_poll_interval_ms: u64,
    /// Directory for pane logs. Defaults to `<tmp>/steprunner`.
    pub log_dir: Option<PathBuf>,
    /// Kill the primary and background sessions when a run completes.
    pub kill_on_complete: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            typing: TypingMode::PerCharacter,
            inter_char_delay_ms: 100,
            settle_delay_ms: 5_000,
            tail_poll_interval_ms: 100,
            log_dir: None,
            kill_on_complete: true,
        }
    }
}

impl TerminalConfig {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("steprunner"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Structured-output CLI and its leading arguments.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Extra attempts after a failed invocation. `0` fails fast.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub prompt_budget_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            max_retries: 0,
            retry_delay_ms: 2_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Ceiling on tool calls within one step.
    pub max_tool_calls: u32,
    /// Upper bound honoured by the `wait` tool.
    pub max_wait_secs: u64,
    /// Token budget of the rolling history.
    pub history_token_budget: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 25,
            max_wait_secs: 300,
            history_token_budget: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: usize,
    /// Entry names skipped entirely. `*.ext` patterns match by suffix.
    pub exclude: Vec<String>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            exclude: [
                ".next",
                "node_modules",
                ".git",
                "venv",
                "venv2",
                "venv3",
                "__pycache__",
                "postgres_data",
                "static",
                ".idea",
                "media",
                "dist",
                "build",
                ".steprunner",
                "*.log",
                "*.tmp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    /// Search CLI; the query is appended as the last argument. Empty disables
    /// web search.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 60,
            output_limit_bytes: 20_000,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.terminal.tail_poll_interval_ms == 0 {
            return Err(anyhow!("terminal.tail_poll_interval_ms must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.model.prompt_budget_bytes == 0 {
            return Err(anyhow!("model.prompt_budget_bytes must be > 0"));
        }
        if self.executor.max_tool_calls == 0 {
            return Err(anyhow!("executor.max_tool_calls must be > 0"));
        }
        if self.tree.max_depth == 0 {
            return Err(anyhow!("tree.max_depth must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
