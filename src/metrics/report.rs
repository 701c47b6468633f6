//! Run report handed to reporting collaborators (HTML/CSV renderers, CI).

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{MlxError, Result};
use crate::core::model::VirtualUserState;
use crate::metrics::summary::AggregatedSummary;
use crate::metrics::thresholds::{ThresholdResult, ThresholdSpec};

/// Final result of one load-test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub test_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub max_virtual_users: usize,
    pub peak_active_users: usize,
    /// Ended by a stop request rather than the deadline.
    pub stopped_early: bool,
    /// Final state of every worker, ordered by id.
    pub workers: Vec<VirtualUserState>,
    pub summary: AggregatedSummary,
    pub thresholds: ThresholdSpec,
    pub threshold_results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl RunReport {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the pretty JSON report, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| MlxError::io(parent, source))?;
        }
        let json = self.to_json_pretty()?;
        fs::write(path, json).map_err(|source| MlxError::io(path, source))
    }

    /// Workers that never reached `Running`.
    pub fn failed_starts(&self) -> impl Iterator<Item = &VirtualUserState> {
        self.workers.iter().filter(|w| w.iterations == 0 && w.errors > 0)
    }
}
