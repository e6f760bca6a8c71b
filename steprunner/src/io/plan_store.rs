//! Plans keyed by change-request id.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{read_json, write_json_atomic};
use crate::core::types::Step;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredPlan {
    change_request: String,
    steps: Vec<Step>,
}

/// Storage for accepted plans.
pub trait PlanStore {
    /// The stored plan for `change_request`, or `None` if there is none yet.
    fn load(&self, change_request: &str) -> Result<Option<Vec<Step>>>;
    fn save(&self, change_request: &str, steps: &[Step]) -> Result<()>;
}

/// One JSON file per change request under `.steprunner/plans/`.
#[derive(Debug, Clone)]
pub struct JsonPlanStore {
    dir: PathBuf,
}

impl JsonPlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, change_request: &str) -> Result<PathBuf> {
        let valid = !change_request.is_empty()
            && change_request
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!(
                "invalid change request id '{change_request}' (use letters, digits, '-' or '_')"
            ));
        }
        Ok(self.dir.join(format!("{change_request}.json")))
    }
}

impl PlanStore for JsonPlanStore {
    fn load(&self, change_request: &str) -> Result<Option<Vec<Step>>> {
        let path = self.path_for(change_request)?;
        if !path.exists() {
            return Ok(None);
        }
        let stored: StoredPlan = read_json(&path)?;
        debug!(change_request, steps = stored.steps.len(), "loaded stored plan");
        Ok(Some(stored.steps))
    }

    fn save(&self, change_request: &str, steps: &[Step]) -> Result<()> {
        let path = self.path_for(change_request)?;
        let stored = StoredPlan {
            change_request: change_request.to_string(),
            steps: steps.to_vec(),
        };
        debug!(change_request, steps = steps.len(), "saving plan");
        write_json_atomic(&path, &stored)
    }
}
