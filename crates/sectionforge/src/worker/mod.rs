//! Workers: opaque agents that fulfil a [`Task`] by writing files.
//!
//! The orchestrator only sees the [`Worker`] trait. A worker receives the
//! task (description, context payload, allowed paths), writes its output
//! to the shared sandbox and reports back a [`WorkerResult`]. How it
//! decides what to write is its own business.
//!
//! | Worker | Use case |
//! |--------|----------|
//! | [`CommandWorker`] | Runs an external agent command per task |
//! | [`FnWorker`] | In-process closure (tests, embedding) |
//!
//! Workers that act through tool calls express them as [`WorkerTool`]
//! actions, which a [`ScopedExecutor`] checks against the task's allowed
//! paths before touching the sandbox.

mod command;
mod tools;

pub use command::{CommandWorker, shell_quote};
pub use tools::{ScopedExecutor, ToolOutcome, WorkerTool, worker_tool_schema};

use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// A boxed future returned by [`Worker::run`].
pub type WorkerFuture<'a> = Pin<Box<dyn Future<Output = WorkerResult> + Send + 'a>>;

/// What a worker reports for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: usize,
    pub success: bool,
    /// Written path → content, or `None` when the content was not echoed back.
    #[serde(default)]
    pub files: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl WorkerResult {
    pub fn succeeded(task_id: usize) -> Self {
        Self {
            task_id,
            success: true,
            files: BTreeMap::new(),
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn failed(task_id: usize, error: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            files: BTreeMap::new(),
            error: Some(error.into()),
            elapsed_ms: 0,
        }
    }

    /// Record a written file along with its content.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), Some(content.into()));
        self
    }

    /// Record a written path without its content.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.files.insert(path.into(), None);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// An agent that fulfils tasks.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Worker for Echo {
///     fn run(&self, task: Task) -> WorkerFuture<'_> {
///         Box::pin(async move { WorkerResult::succeeded(task.id) })
///     }
/// }
/// ```
pub trait Worker: Send + Sync {
    fn run(&self, task: Task) -> WorkerFuture<'_>;
}

/// A worker backed by an async closure.
///
/// ```ignore
/// let worker = FnWorker::new(|task: Task| async move {
///     WorkerResult::succeeded(task.id)
/// });
/// ```
pub struct FnWorker<F>(F);

impl<F, Fut> FnWorker<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = WorkerResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = WorkerResult> + Send + 'static,
{
    fn run(&self, task: Task) -> WorkerFuture<'_> {
        Box::pin((self.0)(task))
    }
}
