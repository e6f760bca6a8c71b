//! External web search.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::io::config::SearchConfig;
use crate::io::process::run_command_with_timeout;

pub trait SearchProvider {
    /// Whether a search backend is available at all.
    fn is_configured(&self) -> bool;
    fn search(&self, query: &str) -> Result<String>;
}

/// Runs a configured CLI with the query as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSearch {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandSearch {
    pub fn from_config(cfg: &SearchConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl SearchProvider for CommandSearch {
    fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }

    #[instrument(skip_all, fields(query = %query))]
    fn search(&self, query: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("web search is not configured"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(query);
        info!("running web search");
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;
        if !output.success() {
            return Err(anyhow!(
                "search command failed ({:?}): {}",
                output.status.code(),
                output.combined_text("search").trim()
            ));
        }
        Ok(output.stdout_text())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_search_reports_itself() {
        let search = CommandSearch::from_config(&SearchConfig::default());
        assert!(!search.is_configured());
        assert!(search.search("rust").is_err());
    }

    #[test]
    fn query_is_passed_as_last_argument() {
        let cfg = SearchConfig {
            command: vec!["echo".to_string(), "results for".to_string()],
            ..SearchConfig::default()
        };
        let out = CommandSearch::from_config(&cfg)
            .search("tmux pipe-pane")
            .expect("search");
        assert_eq!(out.trim(), "results for tmux pipe-pane");
    }
}
