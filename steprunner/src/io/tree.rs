//! Filtered directory tree used as project context for the models.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::io::config::TreeConfig;

/// Render a depth-limited tree of `root`, directories first, hidden entries included.
///
/// The first line is the root path; nested entries use box-drawing connectors.
#[instrument(skip_all, fields(root = %root.display(), max_depth = cfg.max_depth))]
pub fn filtered_tree(root: &Path, cfg: &TreeConfig) -> Result<String> {
    if !root.is_dir() {
        return Err(anyhow!("not a directory: {}", root.display()));
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(cfg.max_depth)
        .sort_by(dirs_first)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.file_name(), &cfg.exclude));

    let entries = walker
        .collect::<std::result::Result<Vec<DirEntry>, _>>()
        .with_context(|| format!("walk {}", root.display()))?;

    let mut out = format!("{}\n", root.display());
    for (i, entry) in entries.iter().enumerate() {
        let depth = entry.depth();
        let mut line = String::new();
        for level in 1..depth {
            line.push_str(if has_later_sibling(&entries, i, level) {
                "│   "
            } else {
                "    "
            });
        }
        line.push_str(if has_later_sibling(&entries, i, depth) {
            "├── "
        } else {
            "└── "
        });
        line.push_str(&entry.file_name().to_string_lossy());
        if entry.file_type().is_dir() {
            line.push('/');
        }
        out.push_str(&line);
        out.push('\n');
    }
    debug!(entries = entries.len(), "rendered filtered tree");
    Ok(out)
}

/// Whether the ancestor of `entries[i]` at `level` (or the entry itself) is followed by a
/// sibling at the same depth.
fn has_later_sibling(entries: &[DirEntry], i: usize, level: usize) -> bool {
    for later in &entries[i + 1..] {
        let depth = later.depth();
        if depth < level {
            return false;
        }
        if depth == level {
            return true;
        }
    }
    false
}

fn dirs_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Exact-name match, or suffix match for `*.ext` patterns.
pub fn is_excluded(name: &OsStr, exclude: &[String]) -> bool {
    let name = name.to_string_lossy();
    exclude.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern.as_str(),
    })
}
