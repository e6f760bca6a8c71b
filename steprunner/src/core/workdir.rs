//! Working-directory tracking for commands typed into a terminal session.
//!
//! The runner never changes its own process directory mid-run. Instead it
//! tracks where the session's shell is by interpreting `cd` commands against
//! the output they produced.

use std::path::{Component, Path, PathBuf};

/// Output fragments that mean the shell refused to change directory.
const CD_FAILURE_MARKERS: &[&str] = &[
    "No such file or directory",
    "Not a directory",
    "Permission denied",
];

/// Extract the target of a leading `cd` in `command`, if any.
///
/// Only the first command of a `&&`/`;`/`||`/`|` chain is inspected. A bare
/// `cd` targets `~`.
pub fn cd_target(command: &str) -> Option<String> {
    let first = command
        .split(['&', ';', '|'])
        .next()
        .unwrap_or_default()
        .trim();
    let words = shell_words::split(first)
        .unwrap_or_else(|_| first.split_whitespace().map(str::to_string).collect());
    let mut words = words.into_iter();
    if words.next().as_deref() != Some("cd") {
        return None;
    }
    Some(words.next().unwrap_or_else(|| "~".to_string()))
}

/// Resolve the directory a `cd` command moved the shell to.
///
/// Returns `None` when `command` is not a `cd`, when the captured output
/// reports a failure, or when the target cannot be determined (`cd -`).
pub fn resolve_cd(command: &str, output: &str, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let target = cd_target(command)?;
    if CD_FAILURE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        return None;
    }
    if target == "-" {
        return None;
    }
    let expanded = if target == "~" {
        home?.to_path_buf()
    } else if let Some(rest) = target.strip_prefix("~/") {
        home?.join(rest)
    } else {
        cwd.join(target)
    };
    Some(normalize(&expanded))
}

/// Resolve a path given relative to `cwd` into a normalized absolute path.
pub fn resolve_relative(cwd: &Path, relative: &str) -> PathBuf {
    normalize(&cwd.join(relative.trim()))
}

/// Lexically normalize `path`: drop `.` and fold `..` without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
