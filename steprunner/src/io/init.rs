//! `.steprunner/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{RunnerConfig, write_config};
use super::project::{JsonProjectStore, ProjectRecord};
use super::tree::filtered_tree;
use crate::core::naming::sanitize_session_name;

const GITIGNORE: &str = "runs/\n";

/// All canonical paths within `.steprunner/` for a project root.
#[derive(Debug, Clone)]
pub struct RunnerPaths {
    pub root: PathBuf,
    pub runner_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub project_path: PathBuf,
    pub plans_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl RunnerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runner_dir = root.join(".steprunner");
        Self {
            root: root.clone(),
            gitignore_path: runner_dir.join(".gitignore"),
            config_path: runner_dir.join("config.toml"),
            project_path: runner_dir.join("project.json"),
            plans_dir: runner_dir.join("plans"),
            runs_dir: runner_dir.join("runs"),
            runner_dir,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn run_state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    pub fn events_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("events.jsonl")
    }

    pub fn steps_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("steps")
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub name: String,
    pub summary: Option<String>,
    /// If true, overwrite the existing config and project record.
    pub force: bool,
}

/// Create `.steprunner/` with a default config and a project record.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectRecord> {
    if !root.is_dir() {
        return Err(anyhow!("project root is not a directory: {}", root.display()));
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("canonicalize {}", root.display()))?;
    let paths = RunnerPaths::new(&root);
    if paths.project_path.exists() && !options.force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite",
            paths.project_path.display()
        ));
    }

    fs::create_dir_all(&paths.plans_dir)
        .with_context(|| format!("create {}", paths.plans_dir.display()))?;
    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create {}", paths.runs_dir.display()))?;
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;

    let config = if paths.config_path.exists() && !options.force {
        super::config::load_config(&paths.config_path)?
    } else {
        let config = RunnerConfig::default();
        write_config(&paths.config_path, &config)?;
        config
    };

    let tree = filtered_tree(&root, &config.tree)?;
    let record = ProjectRecord {
        id: sanitize_session_name(&options.name),
        name: options.name.clone(),
        root_path: root.clone(),
        tree,
        summary: options.summary.clone().unwrap_or_default(),
        files: Default::default(),
    };
    JsonProjectStore::new(&paths.project_path).save(&record)?;
    info!(root = %root.display(), id = %record.id, "initialized project");
    Ok(record)
}
