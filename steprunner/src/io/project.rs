//! Project repository handle and its persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{read_json, write_json_atomic};

/// The repository a run works against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub root_path: PathBuf,
    /// Filtered directory tree, refreshed by `update_project_metadata`.
    #[serde(default)]
    pub tree: String,
    /// Free-form project summary given to the planner.
    #[serde(default)]
    pub summary: String,
    /// Per-file summaries keyed by absolute path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileRecord>,
}

/// Summary of one source file, written by `update_file_summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub summary: String,
    /// Size of the file when it was summarized.
    pub bytes: u64,
}

impl ProjectRecord {
    /// Text handed to the planner as the project summary.
    pub fn planner_context(&self) -> String {
        let mut buf = format!("Project: {} ({})\n", self.name, self.root_path.display());
        if !self.summary.trim().is_empty() {
            buf.push_str(&format!("\n{}\n", self.summary.trim()));
        }
        if !self.tree.trim().is_empty() {
            buf.push_str(&format!("\nDirectory tree:\n{}\n", self.tree.trim_end()));
        }
        if !self.files.is_empty() {
            buf.push_str("\nFile summaries:\n");
            for (path, file) in &self.files {
                buf.push_str(&format!("- {path}: {}\n", file.summary.trim()));
            }
        }
        buf
    }
}

/// Storage for project records.
pub trait ProjectStore {
    fn load(&self) -> Result<ProjectRecord>;
    /// Replace root path and tree of the project with id `project_id`.
    fn update_location(&self, project_id: &str, root_path: &Path, tree: &str) -> Result<()>;
    /// Store `file_record` for `file` and refresh the project tree.
    fn update_file_summary(
        &self,
        project_id: &str,
        file: &Path,
        file_record: FileRecord,
        tree: &str,
    ) -> Result<()>;
}

/// Single project stored as `.steprunner/project.json`.
#[derive(Debug, Clone)]
pub struct JsonProjectStore {
    path: PathBuf,
}

impl JsonProjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(&self, record: &ProjectRecord) -> Result<()> {
        debug!(path = %self.path.display(), id = %record.id, "writing project record");
        write_json_atomic(&self.path, record)
    }
}

impl ProjectStore for JsonProjectStore {
    fn load(&self) -> Result<ProjectRecord> {
        if !self.path.exists() {
            return Err(anyhow!(
                "missing project record {}; run `steprunner init` first",
                self.path.display()
            ));
        }
        read_json(&self.path)
    }

    #[instrument(skip_all, fields(project_id = %project_id, root = %root_path.display()))]
    fn update_location(&self, project_id: &str, root_path: &Path, tree: &str) -> Result<()> {
        let mut record = self.load_matching(project_id)?;
        record.root_path = root_path.to_path_buf();
        record.tree = tree.to_string();
        self.save(&record)
    }

    #[instrument(skip_all, fields(project_id = %project_id, file = %file.display()))]
    fn update_file_summary(
        &self,
        project_id: &str,
        file: &Path,
        file_record: FileRecord,
        tree: &str,
    ) -> Result<()> {
        let mut record = self.load_matching(project_id)?;
        record.tree = tree.to_string();
        record
            .files
            .insert(file.display().to_string(), file_record);
        self.save(&record)
    }
}

impl JsonProjectStore {
    fn load_matching(&self, project_id: &str) -> Result<ProjectRecord> {
        let record = self.load()?;
        if record.id != project_id {
            return Err(anyhow!(
                "unknown project id '{project_id}' (this repository is '{}')",
                record.id
            ));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(root: &Path) -> ProjectRecord {
        ProjectRecord {
            id: "shop".to_string(),
            name: "shop".to_string(),
            root_path: root.to_path_buf(),
            tree: String::new(),
            summary: "A web shop.".to_string(),
            files: BTreeMap::new(),
        }
    }

    #[test]
    fn update_location_rewrites_path_and_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonProjectStore::new(temp.path().join("project.json"));
        store.save(&record(temp.path())).expect("save");

        let moved = temp.path().join("frontend");
        store
            .update_location("shop", &moved, "frontend/\n└── package.json\n")
            .expect("update");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.root_path, moved);
        assert!(loaded.tree.contains("package.json"));
        assert_eq!(loaded.summary, "A web shop.");
    }

    #[test]
    fn update_location_rejects_unknown_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonProjectStore::new(temp.path().join("project.json"));
        store.save(&record(temp.path())).expect("save");
        let err = store
            .update_location("other", temp.path(), "")
            .expect_err("unknown id");
        assert!(err.to_string().contains("unknown project id"));
    }

    /// Verifies file summaries accumulate per path and replace earlier entries.
    #[test]
    fn update_file_summary_upserts_by_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonProjectStore::new(temp.path().join("project.json"));
        store.save(&record(temp.path())).expect("save");
        let app = temp.path().join("app.py");
        let entry = |summary: &str| FileRecord {
            summary: summary.to_string(),
            bytes: 10,
        };

        store
            .update_file_summary("shop", &app, entry("first"), "tree v1")
            .expect("first");
        store
            .update_file_summary("shop", &app, entry("second"), "tree v2")
            .expect("second");
        store
            .update_file_summary("shop", &temp.path().join("db.py"), entry("db"), "tree v3")
            .expect("third");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.files[&app.display().to_string()].summary, "second");
        assert_eq!(loaded.tree, "tree v3");
        let err = store
            .update_file_summary("other", &app, entry("x"), "")
            .expect_err("unknown id");
        assert!(err.to_string().contains("unknown project id"));
    }

    #[test]
    fn planner_context_includes_summary_and_tree() {
        let mut rec = record(Path::new("/srv/shop"));
        rec.tree = "/srv/shop\n└── app.py\n".to_string();
        let ctx = rec.planner_context();
        assert!(ctx.contains("A web shop."));
        assert!(ctx.contains("app.py"));
        assert!(!ctx.contains("File summaries"));

        rec.files.insert(
            "/srv/shop/app.py".to_string(),
            FileRecord {
                summary: "Flask entry point.".to_string(),
                bytes: 120,
            },
        );
        assert!(
            rec.planner_context()
                .contains("- /srv/shop/app.py: Flask entry point.")
        );
    }
}
