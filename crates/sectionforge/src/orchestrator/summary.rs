//! The machine-readable outcome of a dispatch or retry.

use super::deps::DependencyAction;
use super::integrate::IntegrationGap;
use super::run::RunState;
use crate::guard::RETRY_TOOL;
use serde::{Deserialize, Serialize};

/// A task whose latest worker result was a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: usize,
    pub name: String,
    pub error: String,
}

/// Summary of one dispatch or retry call.
///
/// `succeeded`/`failed` describe the whole run after this call, so a
/// retry summary reports the combined state of the first dispatch and
/// every retry since.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub source_id: String,
    pub state: RunState,
    /// Task ids dispatched by this call.
    pub attempted: Vec<usize>,
    pub total: usize,
    pub succeeded: Vec<usize>,
    pub failed: Vec<FailedTask>,
    /// Files written by this call's workers, sorted.
    pub files_written: Vec<String>,
    pub integrated: Vec<usize>,
    pub integration_gaps: Vec<IntegrationGap>,
    pub dependency_actions: Vec<DependencyAction>,
    /// Composition or style files that could not be written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integration_errors: Vec<String>,
    /// Dependency repair and preview problems. Reported, but they never
    /// change the outcome of the run.
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// The exact call that recovers the retryable tasks, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    pub elapsed_ms: u64,
}

impl BuildSummary {
    /// No failed tasks, no integration gaps and no integration errors.
    /// Dependency and preview errors do not count.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.integration_gaps.is_empty()
            && self.integration_errors.is_empty()
    }

    /// Retryable task ids: failures plus integration gaps, sorted.
    pub fn retryable(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .failed
            .iter()
            .map(|f| f.task_id)
            .chain(self.integration_gaps.iter().map(|g| g.task_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Compact one-line summary for logs.
    pub fn to_log_string(&self) -> String {
        let mut s = format!(
            "{}: {}/{} succeeded, {} failed, {} files, {} integrated",
            self.source_id,
            self.succeeded.len(),
            self.total,
            self.failed.len(),
            self.files_written.len(),
            self.integrated.len(),
        );
        if !self.integration_gaps.is_empty() {
            s.push_str(&format!(", {} gaps", self.integration_gaps.len()));
        }
        if !self.dependency_actions.is_empty() {
            s.push_str(&format!(", {} dependency actions", self.dependency_actions.len()));
        }
        if !self.integration_errors.is_empty() {
            s.push_str(&format!(", {} integration errors", self.integration_errors.len()));
        }
        if !self.errors.is_empty() {
            s.push_str(&format!(", {} errors", self.errors.len()));
        }
        s.push_str(&format!(" [{}]", self.state));
        s
    }
}

/// The retry call for `task_ids`, e.g. `retry_sections(source_id="a.com", task_ids=[2, 4])`.
pub fn retry_call(source_id: &str, task_ids: &[usize]) -> String {
    let ids: Vec<String> = task_ids.iter().map(usize::to_string).collect();
    format!(
        "{RETRY_TOOL}(source_id={source_id:?}, task_ids=[{}])",
        ids.join(", ")
    )
}
