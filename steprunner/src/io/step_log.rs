//! Per-step artifacts under `.steprunner/runs/<run-id>/steps/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{FeedbackResponse, Step, StepExecution};

#[derive(Debug, Clone)]
pub struct StepLogPaths {
    pub dir: PathBuf,
    pub step_path: PathBuf,
    pub execution_path: PathBuf,
    pub feedback_path: PathBuf,
}

impl StepLogPaths {
    pub fn new(steps_dir: &Path, index: usize) -> Self {
        let dir = steps_dir.join(index.to_string());
        Self {
            step_path: dir.join("step.json"),
            execution_path: dir.join("execution.json"),
            feedback_path: dir.join("feedback.json"),
            dir,
        }
    }
}

pub struct StepLogRequest<'a> {
    pub steps_dir: &'a Path,
    pub index: usize,
    pub step: &'a Step,
    pub execution: &'a StepExecution,
    pub feedback: &'a FeedbackResponse,
}

pub fn write_step_log(request: &StepLogRequest<'_>) -> Result<StepLogPaths> {
    let paths = StepLogPaths::new(request.steps_dir, request.index);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create step log dir {}", paths.dir.display()))?;

    write_json(&paths.step_path, request.step)?;
    write_json(&paths.execution_path, request.execution)?;
    write_json(&paths.feedback_path, request.feedback)?;

    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutionStop, Revision};

    #[test]
    fn writes_all_three_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = Step::new("Create app", "scaffold it");
        let execution = StepExecution {
            step_index: 2,
            title: step.title.clone(),
            result: "scaffolded".to_string(),
            stop: ExecutionStop::Finished,
            trace: Vec::new(),
        };
        let feedback = FeedbackResponse {
            step_completed: true,
            assessment: "looks fine".to_string(),
            revision: Revision::Keep,
            steps: Vec::new(),
        };
        let paths = write_step_log(&StepLogRequest {
            steps_dir: temp.path(),
            index: 2,
            step: &step,
            execution: &execution,
            feedback: &feedback,
        })
        .expect("write");

        assert!(paths.dir.ends_with("2"));
        let saved = fs::read_to_string(&paths.feedback_path).expect("read");
        assert!(saved.contains("\"revision\": \"keep\""));
        assert!(paths.step_path.exists());
        assert!(paths.execution_path.exists());
    }
}
