//! Build orchestration: dispatch tasks to workers, integrate, repair, preview.
//!
//! One [`Orchestrator`] owns the shared output surface (a [`Sandbox`]), a
//! [`Worker`], an [`InvocationGuard`] and the last [`BuildRun`]. A call to
//! [`dispatch`](Orchestrator::dispatch) or [`retry`](Orchestrator::retry)
//! goes through the same pipeline:
//!
//! 1. **Launch.** Every task runs as its own tokio task with its own
//!    timeout, optionally bounded by a semaphore. A failing, timing-out or
//!    panicking task never affects its siblings.
//! 2. **Join.** All results are collected before anything else happens.
//! 3. **Integrate.** Section namespaces holding their artifact are composed,
//!    in section order, into the root composition and style files
//!    ([`integrate`](integrate::integrate)).
//! 4. **Repair.** Missing packages are installed and a corrupt dependency
//!    cache is rebuilt ([`deps::repair`]).
//! 5. **Preview.** The live preview is restarted when anything was written.
//!
//! Only failures that prevent dispatch from starting are returned as
//! [`BuildError`]. Everything else lands in the [`BuildSummary`].
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(sandbox, worker)
//!     .with_event_handler(Arc::new(LoggingHandler));
//! let summary = orchestrator.dispatch(tasks, "example.com").await?;
//! if !summary.is_success() {
//!     orchestrator.retry("example.com", None).await?;
//! }
//! ```

pub mod deps;
pub mod events;
pub mod integrate;
mod run;
mod summary;

pub use deps::{DependencyAction, DependencyConfig};
pub use events::{
    BuildEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use integrate::{IntegrationGap, IntegrationReport};
pub use run::{BuildRun, RunState, RunStatus};
pub use summary::{BuildSummary, FailedTask, retry_call};

use crate::error::BuildError;
use crate::guard::{DISPATCH_TOOL, InvocationGuard, InvocationPolicy, RETRY_TOOL};
use crate::sandbox::Sandbox;
use crate::task::{OutputLayout, Task, find_path_collision};
use crate::worker::{Worker, WorkerResult};
use futures::future::join_all;
use integrate::StyleInputs;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

// ── Configuration ──────────────────────────────────────────────────

/// Upper bound on the gap between the command and worker timeouts.
const COMMAND_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-task timeout. A timed-out task counts as failed.
    pub worker_timeout: Duration,
    /// Maximum tasks running at once. `None` runs every task at once.
    pub max_concurrency: Option<usize>,
    /// Policy for full dispatches.
    pub dispatch_policy: InvocationPolicy,
    pub layout: OutputLayout,
    pub dependencies: DependencyConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(300),
            max_concurrency: None,
            dispatch_policy: InvocationPolicy::OncePerSource,
            layout: OutputLayout::default(),
            dependencies: DependencyConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_dispatch_policy(mut self, policy: InvocationPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyConfig) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Timeout for an agent command run inside one task. Stays below
    /// [`worker_timeout`](Self::worker_timeout) by 10%, at most 5s, so the
    /// command is stopped and its output collected before the task expires.
    pub fn command_timeout(&self) -> Duration {
        let margin = (self.worker_timeout / 10).min(COMMAND_TIMEOUT_MARGIN);
        self.worker_timeout.saturating_sub(margin)
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Dispatches tasks and keeps the state of the last build run.
pub struct Orchestrator {
    sandbox: Arc<dyn Sandbox>,
    worker: Arc<dyn Worker>,
    guard: Arc<InvocationGuard>,
    config: OrchestratorConfig,
    events: Arc<dyn EventHandler>,
    run: Mutex<Option<BuildRun>>,
}

impl Orchestrator {
    pub fn new(sandbox: Arc<dyn Sandbox>, worker: Arc<dyn Worker>) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            sandbox,
            worker,
            guard: Arc::new(guard_for(&config)),
            config,
            events: Arc::new(NoopHandler),
            run: Mutex::new(None),
        }
    }

    /// Replace the configuration. Also installs a fresh guard carrying the
    /// config's dispatch policy; call [`with_guard`](Self::with_guard)
    /// afterwards to share an existing one.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.guard = Arc::new(guard_for(&config));
        self.config = config;
        self
    }

    pub fn with_guard(mut self, guard: Arc<InvocationGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn guard(&self) -> &Arc<InvocationGuard> {
        &self.guard
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every task, then integrate, repair dependencies and restart the preview.
    pub async fn dispatch(
        &self,
        tasks: Vec<Task>,
        source_id: &str,
    ) -> Result<BuildSummary, BuildError> {
        if tasks.is_empty() {
            return Err(BuildError::NoTasks);
        }
        if let Some((first, second)) = find_path_collision(&tasks) {
            return Err(BuildError::PathCollision { first, second });
        }

        let permit = self.guard.try_acquire(DISPATCH_TOOL, source_id)?;
        let attempt = {
            let mut slot = self.lock_run();
            if let Some(run) = slot.as_ref().filter(|r| r.state.is_active()) {
                return Err(BuildError::RunInProgress {
                    source_id: run.source_id.clone(),
                    state: run.state,
                });
            }
            let mut run = BuildRun::new(source_id, tasks.clone());
            run.advance(RunState::Dispatched);
            let attempt = run.attempts;
            *slot = Some(run);
            attempt
        };

        let summary = self.execute(source_id, tasks, attempt).await;
        permit.complete(summary.is_success(), invocation_metadata(&summary));
        Ok(summary)
    }

    /// Re-dispatch the retryable tasks of the last run for `source_id`.
    ///
    /// With `task_ids`, only the given ids that are retryable run again.
    /// Tasks that already succeeded keep their artifacts.
    pub async fn retry(
        &self,
        source_id: &str,
        task_ids: Option<&[usize]>,
    ) -> Result<BuildSummary, BuildError> {
        let permit = self.guard.try_acquire(RETRY_TOOL, source_id)?;
        let (tasks, attempt) = {
            let mut slot = self.lock_run();
            let run = slot.as_mut().ok_or_else(|| BuildError::NoPriorRun {
                source_id: source_id.to_string(),
            })?;
            if run.source_id != source_id {
                return Err(BuildError::SourceMismatch {
                    requested: source_id.to_string(),
                    last: run.source_id.clone(),
                });
            }
            match run.state {
                RunState::PartiallyFailed => {}
                RunState::Integrated => {
                    return Err(BuildError::NothingToRetry {
                        source_id: source_id.to_string(),
                    });
                }
                state => {
                    return Err(BuildError::RunInProgress {
                        source_id: source_id.to_string(),
                        state,
                    });
                }
            }

            let selected: Vec<usize> = run
                .retryable_ids()
                .into_iter()
                .filter(|id| task_ids.is_none_or(|ids| ids.contains(id)))
                .collect();
            if selected.is_empty() {
                return Err(BuildError::NothingToRetry {
                    source_id: source_id.to_string(),
                });
            }
            let tasks: Vec<Task> = selected
                .iter()
                .filter_map(|id| run.task(*id).cloned())
                .collect();
            run.advance(RunState::Dispatched);
            (tasks, run.attempts)
        };

        info!("Retrying {} tasks for {source_id} (attempt {attempt})", tasks.len());
        let summary = self.execute(source_id, tasks, attempt).await;
        permit.complete(summary.is_success(), invocation_metadata(&summary));
        Ok(summary)
    }

    /// Status of the last run, which must be for `source_id`.
    pub fn status(&self, source_id: &str) -> Result<RunStatus, BuildError> {
        let slot = self.lock_run();
        let run = slot.as_ref().ok_or_else(|| BuildError::NoPriorRun {
            source_id: source_id.to_string(),
        })?;
        if run.source_id != source_id {
            return Err(BuildError::SourceMismatch {
                requested: source_id.to_string(),
                last: run.source_id.clone(),
            });
        }
        Ok(run.status())
    }

    /// A copy of the last run, if any.
    pub fn last_run(&self) -> Option<BuildRun> {
        self.lock_run().clone()
    }

    /// Forget the last run and every guard record.
    pub fn reset(&self) {
        *self.lock_run() = None;
        self.guard.reset(None);
        info!("Orchestrator reset");
    }

    // ── Pipeline ───────────────────────────────────────────────────

    async fn execute(&self, source_id: &str, tasks: Vec<Task>, attempt: u32) -> BuildSummary {
        let started = Instant::now();
        let attempted: Vec<usize> = tasks.iter().map(|t| t.id).collect();
        self.events.on_event(&BuildEvent::DispatchStarted {
            source_id,
            task_ids: &attempted,
            attempt,
        });

        let mut pending = PendingRun::new(self, source_id, attempted.clone());
        let results = self.run_workers(&tasks, &mut pending).await;

        let aggregated = self.update_run(source_id, |run| {
            run.record(results.iter().cloned());
            run.advance(RunState::Aggregated);
            (run.tasks.clone(), run.succeeded_ids())
        });
        let (run_tasks, succeeded) = aggregated.unwrap_or_else(|| {
            warn!("Run for {source_id} was reset during dispatch");
            let succeeded: Vec<usize> =
                results.iter().filter(|r| r.success).map(|r| r.task_id).collect();
            (tasks.clone(), succeeded)
        });
        let succeeded: BTreeSet<usize> = succeeded.into_iter().collect();

        let report = integrate::integrate(
            &*self.sandbox,
            &self.config.layout,
            &run_tasks,
            &succeeded,
            &StyleInputs::from_tasks(&run_tasks),
        )
        .await;
        self.events.on_event(&BuildEvent::Integrated { report: &report });

        let new_files: BTreeMap<String, Option<String>> = results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.files.clone())
            .collect();
        let actions = deps::repair(
            &*self.sandbox,
            &self.config.dependencies,
            &self.config.layout.manifest_file,
            &new_files,
        )
        .await;
        for action in &actions {
            self.events.on_event(&BuildEvent::DependencyAction { action });
        }

        let mut errors: Vec<String> = actions
            .iter()
            .filter(|a| a.is_failure())
            .map(|a| a.to_string())
            .collect();

        let files_written: Vec<String> = results
            .iter()
            .flat_map(|r| r.files.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut preview_url = actions.iter().find_map(|a| match a {
            DependencyAction::Reinstalled { preview_url, .. } => preview_url.clone(),
            _ => None,
        });
        let restarted = actions
            .iter()
            .any(|a| matches!(a, DependencyAction::Reinstalled { .. }));
        if !restarted && (!files_written.is_empty() || !report.written.is_empty()) {
            let preview = self.sandbox.start_preview().await;
            self.events.on_event(&BuildEvent::PreviewRestarted {
                success: preview.success,
                url: preview.url.as_deref(),
            });
            if preview.success {
                preview_url = preview.url;
            } else {
                errors.push("preview failed to restart".into());
            }
        }

        let gap_ids: Vec<usize> = report.gaps.iter().map(|g| g.task_id).collect();
        let run = self
            .update_run(source_id, |run| {
                run.integration_gaps = gap_ids.clone();
                let next = if run.retryable_ids().is_empty() {
                    RunState::Integrated
                } else {
                    RunState::PartiallyFailed
                };
                run.advance(next);
                run.clone()
            })
            .unwrap_or_else(|| detached_run(source_id, &tasks, &results, &gap_ids));
        pending.finish();

        let retryable = run.retryable_ids();
        let failed = run
            .failed_ids()
            .into_iter()
            .map(|id| FailedTask {
                task_id: id,
                name: run.task(id).map(|t| t.name.clone()).unwrap_or_default(),
                error: run
                    .results
                    .get(&id)
                    .and_then(|r| r.error.clone())
                    .unwrap_or_else(|| "no result".into()),
            })
            .collect();

        let summary = BuildSummary {
            source_id: source_id.to_string(),
            state: run.state,
            attempted,
            total: run.tasks.len(),
            succeeded: run.succeeded_ids(),
            failed,
            files_written,
            integrated: report.integrated,
            integration_gaps: report.gaps,
            dependency_actions: actions,
            integration_errors: report.errors,
            errors,
            preview_url,
            next_action: (!retryable.is_empty()).then(|| retry_call(source_id, &retryable)),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        self.events.on_event(&BuildEvent::Finished { summary: &summary });
        summary
    }

    /// Run every task on its own tokio task and wait for all of them.
    /// Results come back in task order.
    async fn run_workers(
        &self,
        tasks: &[Task],
        pending: &mut PendingRun<'_>,
    ) -> Vec<WorkerResult> {
        let semaphore = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let timeout = self.config.worker_timeout;

        let handles: Vec<_> = tasks
            .iter()
            .cloned()
            .map(|task| {
                let worker = Arc::clone(&self.worker);
                let events = Arc::clone(&self.events);
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(s) => s.acquire_owned().await.ok(),
                        None => None,
                    };
                    let id = task.id;
                    let name = task.name.clone();
                    events.on_event(&BuildEvent::TaskStarted {
                        task_id: id,
                        name: &name,
                    });

                    let started = Instant::now();
                    let mut result = match tokio::time::timeout(timeout, worker.run(task)).await {
                        Ok(result) => result,
                        Err(_) => WorkerResult::failed(
                            id,
                            format!("timed out after {}s", timeout.as_secs()),
                        ),
                    };
                    result.task_id = id;
                    if result.elapsed_ms == 0 {
                        result.elapsed_ms = started.elapsed().as_millis() as u64;
                    }
                    events.on_event(&BuildEvent::TaskFinished {
                        name: &name,
                        result: &result,
                    });
                    result
                })
            })
            .collect();
        pending.track(handles.iter().map(|h| h.abort_handle()));

        let joined = join_all(handles).await;
        tasks
            .iter()
            .zip(joined)
            .map(|(task, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    let result = WorkerResult::failed(task.id, format!("worker panicked: {e}"));
                    self.events.on_event(&BuildEvent::TaskFinished {
                        name: &task.name,
                        result: &result,
                    });
                    result
                }
            })
            .collect()
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<BuildRun>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to the current run when it still belongs to `source_id`.
    fn update_run<R>(&self, source_id: &str, f: impl FnOnce(&mut BuildRun) -> R) -> Option<R> {
        let mut slot = self.lock_run();
        match slot.as_mut() {
            Some(run) if run.source_id == source_id => Some(f(run)),
            _ => None,
        }
    }
}

/// Settles the run when a dispatch or retry future is dropped before it
/// finishes: aborts the spawned workers and leaves the run retryable.
struct PendingRun<'a> {
    orchestrator: &'a Orchestrator,
    source_id: &'a str,
    attempted: Vec<usize>,
    workers: Vec<AbortHandle>,
    finished: bool,
}

impl<'a> PendingRun<'a> {
    fn new(orchestrator: &'a Orchestrator, source_id: &'a str, attempted: Vec<usize>) -> Self {
        Self {
            orchestrator,
            source_id,
            attempted,
            workers: Vec::new(),
            finished: false,
        }
    }

    fn track(&mut self, handles: impl IntoIterator<Item = AbortHandle>) {
        self.workers.extend(handles);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for PendingRun<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for worker in &self.workers {
            worker.abort();
        }
        warn!(
            "Dispatch for {} cancelled with {} tasks in flight",
            self.source_id,
            self.attempted.len()
        );
        let attempted = &self.attempted;
        self.orchestrator.update_run(self.source_id, |run| {
            if run.state == RunState::Dispatched {
                run.record(
                    attempted
                        .iter()
                        .map(|id| WorkerResult::failed(*id, "dispatch cancelled")),
                );
                run.advance(RunState::Aggregated);
            }
            if run.state != RunState::Aggregated {
                return;
            }
            // Composition may be incomplete.
            for id in attempted {
                if run.results.get(id).is_some_and(|r| r.success) {
                    run.integration_gaps.push(*id);
                }
            }
            run.integration_gaps.sort_unstable();
            run.integration_gaps.dedup();
            let next = if run.retryable_ids().is_empty() {
                RunState::Integrated
            } else {
                RunState::PartiallyFailed
            };
            run.advance(next);
        });
    }
}

fn guard_for(config: &OrchestratorConfig) -> InvocationGuard {
    InvocationGuard::new().with_policy(DISPATCH_TOOL, config.dispatch_policy)
}

/// Stand-in run used when the live one was reset mid-dispatch.
fn detached_run(
    source_id: &str,
    tasks: &[Task],
    results: &[WorkerResult],
    gaps: &[usize],
) -> BuildRun {
    let mut run = BuildRun::new(source_id, tasks.to_vec());
    run.record(results.iter().cloned());
    run.integration_gaps = gaps.to_vec();
    run.state = if run.retryable_ids().is_empty() {
        RunState::Integrated
    } else {
        RunState::PartiallyFailed
    };
    debug!("Summarizing detached run for {source_id}");
    run
}

fn invocation_metadata(summary: &BuildSummary) -> serde_json::Value {
    json!({
        "tasks": summary.attempted.len(),
        "succeeded": summary.succeeded.len(),
        "failed": summary.failed.len(),
        "integration_gaps": summary.integration_gaps.len(),
        "state": summary.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::partition::Section;
    use crate::sandbox::{CommandOutput, MemorySandbox};
    use crate::task::{SourceContext, build_tasks};
    use crate::worker::FnWorker;

    fn tasks(n: usize) -> Vec<Task> {
        let sections: Vec<Section> = (1..=n)
            .map(|id| Section {
                id,
                rect: Rect::new(0.0, (id - 1) as f64 * 400.0, 1200.0, 400.0),
                tokens: 500,
                content: format!("<section>{id}</section>"),
                selector: format!("section#s{id}"),
                hints: Default::default(),
                oversize: None,
                depth: 0,
            })
            .collect();
        build_tasks(&sections, &SourceContext::new("site"), &OutputLayout::default())
    }

    /// A worker that writes its artifact unless the task id is in `fail`.
    fn writer(sandbox: Arc<MemorySandbox>, fail: Vec<usize>) -> Arc<dyn Worker> {
        Arc::new(FnWorker::new(move |task: Task| {
            let sandbox = Arc::clone(&sandbox);
            let fail = fail.clone();
            async move {
                if fail.contains(&task.id) {
                    return WorkerResult::failed(task.id, "agent error");
                }
                let content = format!("export default function {}() {{ return null; }}", task.component_name());
                sandbox.write_file(&task.artifact_path, &content).await;
                WorkerResult::succeeded(task.id).with_file(task.artifact_path.clone(), content)
            }
        }))
    }

    #[tokio::test]
    async fn dispatch_integrates_every_section() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![]));

        let summary = orchestrator.dispatch(tasks(3), "site").await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.state, RunState::Integrated);
        assert_eq!(summary.succeeded, vec![1, 2, 3]);
        assert_eq!(summary.integrated, vec![1, 2, 3]);
        assert_eq!(summary.files_written.len(), 3);
        assert_eq!(summary.next_action, None);
        assert_eq!(summary.preview_url.as_deref(), Some("http://localhost:5173"));
        assert_eq!(sandbox.preview_starts(), 1);

        let app = sandbox.file("src/App.tsx").unwrap();
        assert!(app.find("<Section1 />").unwrap() < app.find("<Section3 />").unwrap());
    }

    #[test]
    fn command_timeout_stays_below_worker_timeout() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(295));

        let short = OrchestratorConfig::default().with_worker_timeout(Duration::from_secs(10));
        assert_eq!(short.command_timeout(), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn dependency_and_preview_errors_do_not_fail_the_build() {
        let sandbox = Arc::new(
            MemorySandbox::new()
                .without_preview()
                .with_file("package.json", r#"{"name": "site", "dependencies": {}}"#)
                .with_response("npm install", CommandOutput::failed("E404 not found")),
        );
        let out = sandbox.clone();
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(move |task: Task| {
            let sandbox = Arc::clone(&out);
            async move {
                let content = format!(
                    "import pad from 'left-pad';\nexport default function {}() {{ return null; }}",
                    task.component_name()
                );
                sandbox.write_file(&task.artifact_path, &content).await;
                WorkerResult::succeeded(task.id).with_file(task.artifact_path.clone(), content)
            }
        }));
        let orchestrator = Orchestrator::new(sandbox.clone(), worker);

        let summary = orchestrator.dispatch(tasks(2), "site").await.unwrap();

        assert!(summary.is_success(), "{summary:?}");
        assert_eq!(summary.state, RunState::Integrated);
        assert!(summary.integration_errors.is_empty());
        assert!(summary.errors.iter().any(|e| e.contains("E404")), "{:?}", summary.errors);
        assert!(summary.errors.contains(&"preview failed to restart".to_string()));
        assert!(summary.next_action.is_none());
        assert!(orchestrator.status("site").unwrap().retryable.is_empty());

        let record = orchestrator.guard().records().pop().unwrap();
        assert_eq!(record.tool, DISPATCH_TOOL);
        assert!(record.success);
        assert!(matches!(
            orchestrator.dispatch(tasks(2), "site").await,
            Err(BuildError::DispatchRejected(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_dispatch_leaves_a_retryable_run() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let sandbox = Arc::new(MemorySandbox::new());
        let slow = Arc::new(AtomicBool::new(true));
        let inner = writer(sandbox.clone(), vec![]);
        let flag = slow.clone();
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(move |task: Task| {
            let inner = Arc::clone(&inner);
            let flag = Arc::clone(&flag);
            async move {
                if flag.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                inner.run(task).await
            }
        }));
        let orchestrator = Orchestrator::new(sandbox.clone(), worker);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.dispatch(tasks(2), "site"),
        )
        .await;
        assert!(cancelled.is_err());

        let status = orchestrator.status("site").unwrap();
        assert_eq!(status.state, RunState::PartiallyFailed);
        assert_eq!(status.retryable, vec![1, 2]);
        assert!(!orchestrator.guard().records()[0].success);

        // Aborted workers never get to write.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sandbox.files().is_empty());

        slow.store(false, Ordering::SeqCst);
        let summary = orchestrator.retry("site", None).await.unwrap();
        assert_eq!(summary.attempted, vec![1, 2]);
        assert_eq!(summary.state, RunState::Integrated);
    }

    #[tokio::test]
    async fn second_dispatch_is_rejected_after_success() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![]));
        orchestrator.dispatch(tasks(2), "site").await.unwrap();

        let err = orchestrator.dispatch(tasks(2), "site").await.unwrap_err();
        assert!(matches!(err, BuildError::DispatchRejected(_)));
        assert!(err.to_string().contains("retry_sections"));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_retryable() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![2]));

        let summary = orchestrator.dispatch(tasks(3), "site").await.unwrap();

        assert_eq!(summary.state, RunState::PartiallyFailed);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].name, "section_2");
        assert_eq!(summary.failed[0].error, "agent error");
        assert_eq!(summary.integrated, vec![1, 3]);
        assert!(summary.integration_gaps.is_empty());
        assert_eq!(
            summary.next_action.as_deref(),
            Some(r#"retry_sections(source_id="site", task_ids=[2])"#)
        );
        assert_eq!(orchestrator.status("site").unwrap().retryable, vec![2]);
    }

    #[tokio::test]
    async fn timed_out_tasks_fail_alone() {
        let sandbox = Arc::new(MemorySandbox::new());
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(|task: Task| async move {
            if task.id == 1 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            WorkerResult::succeeded(task.id)
        }));
        let orchestrator = Orchestrator::new(sandbox, worker).with_config(
            OrchestratorConfig::default().with_worker_timeout(Duration::from_millis(50)),
        );

        let summary = orchestrator.dispatch(tasks(2), "site").await.unwrap();
        assert_eq!(summary.succeeded, vec![2]);
        assert!(summary.failed[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_worker_is_a_failure() {
        let sandbox = Arc::new(MemorySandbox::new());
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(|task: Task| async move {
            if task.id == 2 {
                panic!("worker bug");
            }
            WorkerResult::succeeded(task.id)
        }));
        let orchestrator = Orchestrator::new(sandbox, worker);

        let summary = orchestrator.dispatch(tasks(2), "site").await.unwrap();
        assert_eq!(summary.succeeded, vec![1]);
        assert!(summary.failed[0].error.contains("panicked"));
    }

    #[tokio::test]
    async fn successful_task_without_artifact_is_a_gap() {
        let sandbox = Arc::new(MemorySandbox::new());
        let worker: Arc<dyn Worker> =
            Arc::new(FnWorker::new(|task: Task| async move { WorkerResult::succeeded(task.id) }));
        let orchestrator = Orchestrator::new(sandbox, worker);

        let summary = orchestrator.dispatch(tasks(1), "site").await.unwrap();
        assert!(summary.failed.is_empty());
        assert_eq!(summary.integration_gaps.len(), 1);
        assert_eq!(summary.state, RunState::PartiallyFailed);
        assert_eq!(orchestrator.status("site").unwrap().retryable, vec![1]);
    }

    #[tokio::test]
    async fn retry_preconditions() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![]));

        assert!(matches!(
            orchestrator.retry("site", None).await,
            Err(BuildError::NoPriorRun { .. })
        ));

        orchestrator.dispatch(tasks(2), "site").await.unwrap();
        assert!(matches!(
            orchestrator.retry("other", None).await,
            Err(BuildError::SourceMismatch { .. })
        ));
        assert!(matches!(
            orchestrator.retry("site", None).await,
            Err(BuildError::NothingToRetry { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_ids_are_intersected_with_retryable() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![2]));
        orchestrator.dispatch(tasks(3), "site").await.unwrap();

        assert!(matches!(
            orchestrator.retry("site", Some(&[1, 3][..])).await,
            Err(BuildError::NothingToRetry { .. })
        ));
        let summary = orchestrator.retry("site", Some(&[1, 2][..])).await.unwrap();
        assert_eq!(summary.attempted, vec![2]);
    }

    #[tokio::test]
    async fn empty_and_colliding_task_sets_are_refused() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![]));
        assert!(matches!(
            orchestrator.dispatch(Vec::new(), "site").await,
            Err(BuildError::NoTasks)
        ));

        let mut dup = tasks(2);
        dup[1] = dup[0].clone();
        assert!(matches!(
            orchestrator.dispatch(dup, "site").await,
            Err(BuildError::PathCollision { .. })
        ));
        assert!(orchestrator.last_run().is_none());
    }

    #[tokio::test]
    async fn reset_allows_a_fresh_dispatch() {
        let sandbox = Arc::new(MemorySandbox::new());
        let orchestrator = Orchestrator::new(sandbox.clone(), writer(sandbox.clone(), vec![]));
        orchestrator.dispatch(tasks(1), "site").await.unwrap();

        orchestrator.reset();
        assert!(orchestrator.last_run().is_none());
        assert!(orchestrator.dispatch(tasks(1), "site").await.is_ok());
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(move |task: Task| {
            let (r, p) = (r.clone(), p.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                WorkerResult::succeeded(task.id)
            }
        }));
        let orchestrator = Orchestrator::new(Arc::new(MemorySandbox::new()), worker)
            .with_config(OrchestratorConfig::default().with_max_concurrency(2));

        orchestrator.dispatch(tasks(6), "site").await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
