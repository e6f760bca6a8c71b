//! `update_project_metadata` and `update_file_summary`.

use std::fs;

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::files::NOT_FOUND_MARKER;
use crate::core::types::{FileSummaryResponse, ToolCall, ToolInvocationResult};
use crate::core::workdir::resolve_relative;
use crate::io::model::Contract;
use crate::io::project::FileRecord;
use crate::io::prompt::FileSummaryPrompt;
use crate::io::run_state::RunState;
use crate::io::tree::filtered_tree;
use crate::runtime::Runtime;

/// Record a new project root and its freshly computed tree.
#[instrument(skip_all, fields(project_id = %project_id, path = %path))]
pub fn update_project_metadata(
    rt: &Runtime<'_>,
    state: &RunState,
    call: &ToolCall,
    project_id: &str,
    path: &str,
) -> ToolInvocationResult {
    let root = resolve_relative(&state.working_directory, path);
    let outcome = filtered_tree(&root, &rt.config.tree).and_then(|tree| {
        rt.projects
            .update_location(project_id, &root, &tree)
            .map(|()| tree)
    });
    let text = match outcome {
        Ok(tree) => format!(
            "New project path: {}\ntree structure:\n{tree}",
            root.display()
        ),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "project metadata update failed");
            format!("An error occurred while updating project metadata: {err:#}")
        }
    };
    ToolInvocationResult::new(call, text)
}

/// Summarize one file with the model and store the summary on the project.
///
/// The project tree is recomputed from the stored root first so the summary
/// sees the current layout. Only a model failure is returned as `Err`.
#[instrument(skip_all, fields(project_id = %project_id, path = %path))]
pub fn update_file_summary(
    rt: &Runtime<'_>,
    state: &RunState,
    call: &ToolCall,
    project_id: &str,
    path: &str,
) -> Result<ToolInvocationResult> {
    let fail = |what: &str, err: &dyn std::fmt::Display| {
        warn!(err = %err, "{what} failed");
        ToolInvocationResult::new(
            call,
            format!("An error occurred while updating the file summary: {what}: {err}"),
        )
    };

    let absolute = resolve_relative(&state.working_directory, path);
    if !absolute.is_file() {
        return Ok(ToolInvocationResult::new(
            call,
            format!("{NOT_FOUND_MARKER} ({})", absolute.display()),
        ));
    }
    let bytes = match fs::read(&absolute) {
        Ok(bytes) => bytes,
        Err(err) => return Ok(fail("read", &err)),
    };
    let content = String::from_utf8_lossy(&bytes);
    let project = match rt.projects.load() {
        Ok(project) if project.id == project_id => project,
        Ok(project) => {
            return Ok(ToolInvocationResult::new(
                call,
                format!(
                    "An error occurred while updating the file summary: unknown project id '{project_id}' (this repository is '{}')",
                    project.id
                ),
            ));
        }
        Err(err) => return Ok(fail("load project", &format!("{err:#}"))),
    };
    let tree = match filtered_tree(&project.root_path, &rt.config.tree) {
        Ok(tree) => tree,
        Err(err) => return Ok(fail("tree", &format!("{err:#}"))),
    };

    let display_path = absolute.display().to_string();
    let prompt = rt.prompts.file_summary(&FileSummaryPrompt {
        path: &display_path,
        content: &content,
        tree: &tree,
    })?;
    let response: FileSummaryResponse = rt.model.invoke(
        Contract::FileSummary,
        &prompt,
        &state.working_directory,
        None,
    )?;
    let summary = response.summary.trim().to_string();

    let record = FileRecord {
        summary: summary.clone(),
        bytes: bytes.len() as u64,
    };
    if let Err(err) = rt
        .projects
        .update_file_summary(project_id, &absolute, record, &tree)
    {
        return Ok(fail("store", &format!("{err:#}")));
    }
    info!(bytes = bytes.len(), "stored file summary");
    Ok(ToolInvocationResult::new(
        call,
        format!("Summary of {display_path}:\n{summary}"),
    ))
}
