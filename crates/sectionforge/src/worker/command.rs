use super::tools::{ScopedExecutor, ToolOutcome, WorkerTool};
use super::{Worker, WorkerFuture, WorkerResult};
use crate::sandbox::{Sandbox, list_files_recursive};
use crate::task::Task;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the task file written into each namespace before the command runs.
pub const TASK_FILE: &str = ".task.json";

/// Characters of stderr kept in a failure message.
const MAX_ERROR_CHARS: usize = 2_000;

/// Runs an external agent command once per task.
///
/// The command template may reference `{{task_file}}`, `{{output_dir}}`,
/// `{{section}}` and `{{task_id}}`; values are shell-quoted. Before the
/// command runs, the task is written as JSON to `<output_dir>/.task.json`.
///
/// The command may write files itself, or print [`WorkerTool`] actions as
/// JSON lines on stdout; those are executed through a [`ScopedExecutor`]
/// limited to the task's namespace once the command has exited. Only
/// `write_file` and `run_command` are honoured there; a refused write or a
/// failing command fails the task. `read_file` and `list_files` lines are
/// ignored. Afterwards the namespace is listed to build the file manifest.
///
/// ```ignore
/// let worker = CommandWorker::new(sandbox, "my-agent --task {{task_file}} --out {{output_dir}}");
/// ```
pub struct CommandWorker {
    sandbox: Arc<dyn Sandbox>,
    template: String,
    timeout: Duration,
}

impl CommandWorker {
    pub fn new(sandbox: Arc<dyn Sandbox>, template: impl Into<String>) -> Self {
        Self {
            sandbox,
            template: template.into(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Timeout for the agent command itself.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line for `task`.
    pub fn render(&self, task: &Task) -> String {
        let task_file = format!("{}/{TASK_FILE}", task.output_dir);
        let task_id = task.id.to_string();
        [
            ("task_file", task_file.as_str()),
            ("output_dir", task.output_dir.as_str()),
            ("section", task.name.as_str()),
            ("task_id", task_id.as_str()),
        ]
        .iter()
        .fold(self.template.clone(), |cmd, (key, value)| {
            cmd.replace(&format!("{{{{{key}}}}}"), &shell_quote(value))
        })
    }

    async fn run_task(&self, task: Task) -> WorkerResult {
        let task_file = format!("{}/{TASK_FILE}", task.output_dir);
        let payload = match serde_json::to_string_pretty(&task) {
            Ok(json) => json,
            Err(e) => return WorkerResult::failed(task.id, format!("cannot serialize task: {e}")),
        };
        if !self.sandbox.write_file(&task_file, &payload).await {
            return WorkerResult::failed(task.id, format!("cannot write {task_file}"));
        }

        let command = self.render(&task);
        debug!("[{}] {command}", task.name);
        let output = self.sandbox.run_command(&command, self.timeout).await;

        let executor = ScopedExecutor::for_task(self.sandbox.clone(), &task);
        let mut files = std::collections::BTreeMap::new();
        let mut rejected = Vec::new();
        for line in output.stdout.lines().map(str::trim) {
            if !line.starts_with('{') {
                continue;
            }
            let Ok(action) = serde_json::from_str::<WorkerTool>(line) else {
                continue;
            };
            let tool = action.name();
            if matches!(action, WorkerTool::ReadFile { .. } | WorkerTool::ListFiles { .. }) {
                debug!("[{}] ignoring {tool} printed after the command exited", task.name);
                continue;
            }
            match executor.execute(action).await {
                ToolOutcome::Written { path } => {
                    files.insert(path, None);
                }
                ToolOutcome::Rejected { reason } | ToolOutcome::Failed { reason } => {
                    warn!("[{}] {tool} refused: {reason}", task.name);
                    rejected.push(format!("{tool}: {reason}"));
                }
                ToolOutcome::Ran { output } if !output.success => {
                    warn!("[{}] {tool} failed", task.name);
                    rejected.push(format!(
                        "{tool}: {}",
                        tail_chars(&output.combined(), MAX_ERROR_CHARS)
                    ));
                }
                _ => {}
            }
        }

        for entry in list_files_recursive(self.sandbox.as_ref(), &task.output_dir).await {
            if entry.name != TASK_FILE {
                files.entry(entry.path).or_insert(None);
            }
        }

        let error = if !output.success {
            Some(tail_chars(&output.stderr, MAX_ERROR_CHARS))
        } else if !rejected.is_empty() {
            Some(rejected.join("; "))
        } else {
            None
        };
        WorkerResult {
            task_id: task.id,
            success: error.is_none(),
            files,
            error,
            elapsed_ms: 0,
        }
    }
}

impl Worker for CommandWorker {
    fn run(&self, task: Task) -> WorkerFuture<'_> {
        Box::pin(async move {
            let name = task.name.clone();
            let started = Instant::now();
            let result = self.run_task(task).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                "[{name}] agent finished in {elapsed_ms}ms ({}, {} files)",
                if result.success { "ok" } else { "failed" },
                result.files.len()
            );
            result.with_elapsed_ms(elapsed_ms)
        })
    }
}

/// Single-quote a value for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.trim().to_string();
    }
    let tail: String = s.chars().skip(count - max).collect();
    format!("...{}", tail.trim())
}
