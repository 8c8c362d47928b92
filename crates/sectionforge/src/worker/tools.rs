use crate::sandbox::{CommandOutput, Sandbox};
use crate::task::{Task, normalize_path};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default blocked shell command patterns (lowercased substrings).
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &["rm -rf /", "mkfs", "> /dev/"];

/// Default timeout for worker-issued commands.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// The closed set of actions a worker may request.
///
/// Serialized with a `tool` tag, one JSON object per action:
/// `{"tool": "write_file", "path": "...", "content": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum WorkerTool {
    /// Write a file inside the task's namespace.
    WriteFile {
        /// Path relative to the project root.
        path: String,
        content: String,
    },
    /// Read any project file.
    ReadFile { path: String },
    /// List a directory.
    ListFiles { path: String },
    /// Run a shell command at the project root.
    RunCommand {
        command: String,
        /// Timeout in seconds (default 120).
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl WorkerTool {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerTool::WriteFile { .. } => "write_file",
            WorkerTool::ReadFile { .. } => "read_file",
            WorkerTool::ListFiles { .. } => "list_files",
            WorkerTool::RunCommand { .. } => "run_command",
        }
    }
}

/// JSON schema of [`WorkerTool`], handed to external workers.
pub fn worker_tool_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(WorkerTool)).unwrap_or_default()
}

/// Result of one executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Written { path: String },
    Read { path: String, content: Option<String> },
    Listed { path: String, entries: Vec<String> },
    Ran { output: CommandOutput },
    /// Refused before touching the sandbox.
    Rejected { reason: String },
    /// Attempted but the sandbox reported failure.
    Failed { reason: String },
}

impl ToolOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ToolOutcome::Rejected { .. })
    }
}

/// Executes [`WorkerTool`] actions on behalf of one task.
///
/// Writes must land inside the task's allowed paths. Any path containing
/// `..` is refused, as are commands matching a blocked pattern.
pub struct ScopedExecutor {
    sandbox: Arc<dyn Sandbox>,
    allowed_paths: Vec<String>,
    blocked_commands: Vec<String>,
}

impl ScopedExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>, allowed_paths: Vec<String>) -> Self {
        Self {
            sandbox,
            allowed_paths,
            blocked_commands: DEFAULT_BLOCKED_COMMANDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Executor scoped to a task's namespace.
    pub fn for_task(sandbox: Arc<dyn Sandbox>, task: &Task) -> Self {
        Self::new(sandbox, task.allowed_paths.clone())
    }

    /// Add a blocked command pattern (lowercased substring match).
    pub fn block_command(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_commands.push(pattern.into().to_lowercase());
        self
    }

    fn may_write(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.allowed_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub async fn execute(&self, tool: WorkerTool) -> ToolOutcome {
        debug!("Worker action: {}", tool.name());
        match tool {
            WorkerTool::WriteFile { path, content } => {
                if path.contains("..") {
                    return rejected("path traversal not allowed");
                }
                if !self.may_write(&path) {
                    warn!("Rejected write outside namespace: {path}");
                    return rejected(&format!(
                        "'{path}' is outside the allowed paths ({})",
                        self.allowed_paths.join(", ")
                    ));
                }
                let path = normalize_path(&path).to_string();
                if self.sandbox.write_file(&path, &content).await {
                    ToolOutcome::Written { path }
                } else {
                    ToolOutcome::Failed {
                        reason: format!("could not write '{path}'"),
                    }
                }
            }
            WorkerTool::ReadFile { path } => {
                if path.contains("..") {
                    return rejected("path traversal not allowed");
                }
                let content = self.sandbox.read_file(normalize_path(&path)).await;
                ToolOutcome::Read { path, content }
            }
            WorkerTool::ListFiles { path } => {
                if path.contains("..") {
                    return rejected("path traversal not allowed");
                }
                let entries = self
                    .sandbox
                    .list_files(normalize_path(&path))
                    .await
                    .into_iter()
                    .map(|e| if e.is_dir { format!("{}/", e.name) } else { e.name })
                    .collect();
                ToolOutcome::Listed { path, entries }
            }
            WorkerTool::RunCommand {
                command,
                timeout_secs,
            } => {
                let lower = command.to_lowercase();
                if self.blocked_commands.iter().any(|pat| lower.contains(pat.as_str())) {
                    return rejected("potentially destructive command blocked");
                }
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT);
                ToolOutcome::Ran {
                    output: self.sandbox.run_command(&command, timeout).await,
                }
            }
        }
    }
}

fn rejected(reason: &str) -> ToolOutcome {
    ToolOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MemorySandbox;

    fn executor(sandbox: Arc<MemorySandbox>) -> ScopedExecutor {
        ScopedExecutor::new(sandbox, vec!["src/sections/section_1/".into()])
    }

    #[test]
    fn actions_parse_from_tagged_json() {
        let tool: WorkerTool = serde_json::from_str(
            r#"{"tool": "write_file", "path": "src/sections/section_1/index.tsx", "content": "x"}"#,
        )
        .unwrap();
        assert_eq!(tool.name(), "write_file");

        let cmd: WorkerTool =
            serde_json::from_str(r#"{"tool": "run_command", "command": "ls"}"#).unwrap();
        assert_eq!(
            cmd,
            WorkerTool::RunCommand {
                command: "ls".into(),
                timeout_secs: None
            }
        );

        assert!(serde_json::from_str::<WorkerTool>(r#"{"tool": "delete_everything"}"#).is_err());
    }

    #[test]
    fn schema_lists_every_action() {
        let schema = worker_tool_schema().to_string();
        for name in ["write_file", "read_file", "list_files", "run_command"] {
            assert!(schema.contains(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn writes_inside_namespace_succeed() {
        let sandbox = Arc::new(MemorySandbox::new());
        let outcome = executor(sandbox.clone())
            .execute(WorkerTool::WriteFile {
                path: "./src/sections/section_1/index.tsx".into(),
                content: "export default function Section1() {}".into(),
            })
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::Written {
                path: "src/sections/section_1/index.tsx".into()
            }
        );
        assert!(sandbox.file("src/sections/section_1/index.tsx").is_some());
    }

    #[tokio::test]
    async fn writes_outside_namespace_are_rejected() {
        let sandbox = Arc::new(MemorySandbox::new());
        let exec = executor(sandbox.clone());
        for path in [
            "src/App.tsx",
            "src/sections/section_2/index.tsx",
            "src/sections/section_1/../section_2/index.tsx",
        ] {
            let outcome = exec
                .execute(WorkerTool::WriteFile {
                    path: path.into(),
                    content: "x".into(),
                })
                .await;
            assert!(outcome.is_rejected(), "{path} should be rejected");
        }
        assert!(sandbox.files().is_empty());
    }

    #[tokio::test]
    async fn reads_are_unrestricted_but_traversal_is_not() {
        let sandbox = Arc::new(MemorySandbox::new().with_file("package.json", "{}"));
        let exec = executor(sandbox);
        let outcome = exec
            .execute(WorkerTool::ReadFile {
                path: "package.json".into(),
            })
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::Read {
                path: "package.json".into(),
                content: Some("{}".into())
            }
        );
        assert!(
            exec.execute(WorkerTool::ReadFile {
                path: "../secrets".into()
            })
            .await
            .is_rejected()
        );
    }

    #[tokio::test]
    async fn blocked_commands_never_reach_the_sandbox() {
        let sandbox = Arc::new(MemorySandbox::new());
        let exec = executor(sandbox.clone()).block_command("git push");
        for command in ["rm -rf / --no-preserve-root", "GIT PUSH origin main"] {
            let outcome = exec
                .execute(WorkerTool::RunCommand {
                    command: command.into(),
                    timeout_secs: None,
                })
                .await;
            assert!(outcome.is_rejected());
        }
        assert!(sandbox.commands().is_empty());
    }

    #[tokio::test]
    async fn listing_marks_directories() {
        let sandbox = Arc::new(
            MemorySandbox::new()
                .with_file("src/sections/section_1/index.tsx", "x")
                .with_file("src/sections/section_1/parts/a.tsx", "y"),
        );
        let outcome = executor(sandbox)
            .execute(WorkerTool::ListFiles {
                path: "src/sections/section_1".into(),
            })
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::Listed {
                path: "src/sections/section_1".into(),
                entries: vec!["index.tsx".into(), "parts/".into()],
            }
        );
    }
}
