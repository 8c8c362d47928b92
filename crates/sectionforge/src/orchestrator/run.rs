//! Per-source build state.

use crate::task::Task;
use crate::worker::WorkerResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Lifecycle of a [`BuildRun`].
///
/// ```text
/// NotStarted → Dispatched → Aggregated → Integrated
///                  ↑                   ↘ PartiallyFailed
///                  └───────── retry ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Dispatched,
    Aggregated,
    Integrated,
    PartiallyFailed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (NotStarted, Dispatched)
                | (Dispatched, Aggregated)
                | (Aggregated, Integrated)
                | (Aggregated, PartiallyFailed)
                | (PartiallyFailed, Dispatched)
        )
    }

    /// Whether workers may currently be running for this run.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Dispatched | RunState::Aggregated)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::NotStarted => "not started",
            RunState::Dispatched => "dispatched",
            RunState::Aggregated => "aggregated",
            RunState::Integrated => "integrated",
            RunState::PartiallyFailed => "partially failed",
        };
        f.write_str(s)
    }
}

/// The stateful record of one partition → dispatch → integrate cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRun {
    pub source_id: String,
    pub state: RunState,
    /// Every task of the run, in section order.
    pub tasks: Vec<Task>,
    /// Latest result per task id.
    pub results: BTreeMap<usize, WorkerResult>,
    /// Tasks that succeeded but whose artifact was missing at integration.
    pub integration_gaps: Vec<usize>,
    /// Dispatch attempts, the first dispatch included.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildRun {
    pub fn new(source_id: impl Into<String>, tasks: Vec<Task>) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            state: RunState::NotStarted,
            tasks,
            results: BTreeMap::new(),
            integration_gaps: Vec::new(),
            attempts: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`. Returns `false` (and stays put) on an illegal transition.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Illegal run transition for {}: {} → {}",
                self.source_id, self.state, next
            );
            return false;
        }
        debug!("Run {}: {} → {}", self.source_id, self.state, next);
        if next == RunState::Dispatched {
            self.attempts += 1;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    /// Merge results, replacing earlier results for the same task.
    pub fn record(&mut self, results: impl IntoIterator<Item = WorkerResult>) {
        for result in results {
            self.results.insert(result.task_id, result);
        }
        self.updated_at = Utc::now();
    }

    pub fn task(&self, id: usize) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn succeeded_ids(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .filter(|t| self.results.get(&t.id).is_some_and(|r| r.success))
            .map(|t| t.id)
            .collect()
    }

    /// Tasks without a successful result.
    pub fn failed_ids(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .filter(|t| !self.results.get(&t.id).is_some_and(|r| r.success))
            .map(|t| t.id)
            .collect()
    }

    /// Failed tasks plus integration gaps, in section order.
    pub fn retryable_ids(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .map(|t| t.id)
            .filter(|id| {
                !self.results.get(id).is_some_and(|r| r.success)
                    || self.integration_gaps.contains(id)
            })
            .collect()
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            source_id: self.source_id.clone(),
            state: self.state,
            total: self.tasks.len(),
            succeeded: self.succeeded_ids(),
            failed: self.failed_ids(),
            integration_gaps: self.integration_gaps.clone(),
            retryable: self.retryable_ids(),
            attempts: self.attempts,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of a [`BuildRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub source_id: String,
    pub state: RunState,
    pub total: usize,
    pub succeeded: Vec<usize>,
    pub failed: Vec<usize>,
    pub integration_gaps: Vec<usize>,
    pub retryable: Vec<usize>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
