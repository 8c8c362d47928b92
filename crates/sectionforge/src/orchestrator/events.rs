//! Build events and handlers for the [`Orchestrator`](super::Orchestrator).
//!
//! The orchestrator reports progress through [`BuildEvent`] variants, from
//! dispatch start to the final summary. Implement [`EventHandler`] to
//! observe them.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget builds |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |

use super::deps::DependencyAction;
use super::integrate::IntegrationReport;
use super::summary::BuildSummary;
use crate::worker::WorkerResult;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the orchestrator during a dispatch or retry.
#[derive(Debug)]
pub enum BuildEvent<'a> {
    /// Tasks are about to be launched.
    DispatchStarted {
        source_id: &'a str,
        task_ids: &'a [usize],
        attempt: u32,
    },
    /// One task was handed to the worker.
    TaskStarted { task_id: usize, name: &'a str },
    /// One task finished (successfully or not).
    TaskFinished { name: &'a str, result: &'a WorkerResult },
    /// Auto-integration completed.
    Integrated { report: &'a IntegrationReport },
    /// Dependency repair did something.
    DependencyAction { action: &'a DependencyAction },
    /// The live preview was (re)started.
    PreviewRestarted { success: bool, url: Option<&'a str> },
    /// The call is complete.
    Finished { summary: &'a BuildSummary },
}

/// Handler for build events.
///
/// The default implementation ignores every event.
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &BuildEvent<'_>) {
///         if let BuildEvent::TaskFinished { name, result } = event {
///             println!("{name}: {}", if result.success { "ok" } else { "failed" });
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &BuildEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&BuildEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&BuildEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&BuildEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &BuildEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that logs through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &BuildEvent<'_>) {
        match event {
            BuildEvent::DispatchStarted {
                source_id,
                task_ids,
                attempt,
            } => {
                info!(
                    "[{source_id}] dispatching {} tasks (attempt {attempt}): {task_ids:?}",
                    task_ids.len()
                );
            }
            BuildEvent::TaskStarted { task_id, name } => {
                debug!("Task {task_id} ({name}) started");
            }
            BuildEvent::TaskFinished { name, result } => {
                if result.success {
                    info!(
                        "{name} finished in {}ms ({} files)",
                        result.elapsed_ms,
                        result.files.len()
                    );
                } else {
                    warn!(
                        "{name} failed after {}ms: {}",
                        result.elapsed_ms,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            BuildEvent::Integrated { report } => {
                info!(
                    "Integrated sections {:?}, {} gaps",
                    report.integrated,
                    report.gaps.len()
                );
                for gap in &report.gaps {
                    warn!("Integration gap: {} (missing {})", gap.name, gap.expected);
                }
            }
            BuildEvent::DependencyAction { action } => {
                if action.is_failure() {
                    warn!("Dependency repair: {action}");
                } else {
                    info!("Dependency repair: {action}");
                }
            }
            BuildEvent::PreviewRestarted { success, url } => {
                if *success {
                    info!("Preview running at {}", url.unwrap_or("(no url)"));
                } else {
                    warn!("Preview failed to start");
                }
            }
            BuildEvent::Finished { summary } => {
                info!("{}", summary.to_log_string());
                if let Some(ref next) = summary.next_action {
                    info!("Next: {next}");
                }
            }
        }
    }
}
