//! `read_file` and `edit_file`.

use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{FileRewrite, SideEffect, ToolCall, ToolInvocationResult};
use crate::core::workdir::resolve_relative;
use crate::io::model::Contract;
use crate::io::prompt::FileRewritePrompt;
use crate::runtime::Runtime;

pub(crate) const NOT_FOUND_MARKER: &str = "No existing code found at the specified path.";

/// Contents of `path` relative to `cwd`, or an inline not-found / error message.
pub fn read_file(cwd: &Path, call: &ToolCall, path: &str) -> ToolInvocationResult {
    let absolute = resolve_relative(cwd, path);
    if !absolute.exists() {
        return ToolInvocationResult::new(
            call,
            format!("{NOT_FOUND_MARKER} ({})", absolute.display()),
        );
    }
    let text = match fs::read(&absolute) {
        Ok(bytes) => format!(
            "The current code is:\n```\n{}\n```\n",
            String::from_utf8_lossy(&bytes)
        ),
        Err(err) => {
            warn!(path = %absolute.display(), err = %err, "read_file failed");
            format!("An error occurred while reading {}: {err}", absolute.display())
        }
    };
    ToolInvocationResult::new(call, text)
}

/// Ask the model for a full replacement of `path` and write it when it differs.
///
/// Only a model failure is returned as `Err`.
#[instrument(skip_all, fields(path = %path, create = create))]
pub fn edit_file(
    rt: &Runtime<'_>,
    cwd: &Path,
    call: &ToolCall,
    path: &str,
    instructions: &str,
    create: bool,
) -> Result<ToolInvocationResult> {
    let absolute = resolve_relative(cwd, path);
    let existed = absolute.is_file();
    if !existed && !create {
        return Ok(ToolInvocationResult::new(
            call,
            format!(
                "File {} does not exist. Set `create` to true to write a new file.",
                absolute.display()
            ),
        ));
    }
    if let Some(parent) = absolute.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        return Ok(ToolInvocationResult::new(
            call,
            format!(
                "An error occurred while creating directory {}: {err}",
                parent.display()
            ),
        ));
    }
    let existing = if existed {
        match fs::read(&absolute) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                return Ok(ToolInvocationResult::new(
                    call,
                    format!(
                        "An error occurred while reading {}: {err}",
                        absolute.display()
                    ),
                ));
            }
        }
    } else {
        String::new()
    };

    let display_path = absolute.display().to_string();
    let prompt = rt.prompts.file_rewrite(&FileRewritePrompt {
        path: &display_path,
        instructions,
        exists: existed,
        existing: &existing,
    })?;
    let rewrite: FileRewrite = rt
        .model
        .invoke(Contract::FileRewrite, &prompt, cwd, None)?;
    let updated = normalize_body(&rewrite.updated_code);

    if existed && updated == existing {
        info!("content unchanged; skipping write");
        return Ok(ToolInvocationResult::new(
            call,
            format!("File '{display_path}' already matches the requested change; nothing written."),
        ));
    }
    if let Err(err) = fs::write(&absolute, &updated) {
        warn!(err = %err, "edit_file write failed");
        return Ok(ToolInvocationResult::new(
            call,
            format!("An error occurred while updating the file {display_path}: {err}"),
        ));
    }
    info!(created = !existed, bytes = updated.len(), "file written");
    Ok(ToolInvocationResult::new(
        call,
        format!("File '{display_path}' was updated to:\n```\n{updated}```\n"),
    )
    .with_effect(SideEffect::FileChanged {
        path: absolute,
        created: !existed,
    }))
}

/// Trimmed body with exactly one trailing newline; empty stays empty.
fn normalize_body(code: &str) -> String {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}
