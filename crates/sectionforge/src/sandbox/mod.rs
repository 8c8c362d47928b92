//! The execution surface shared by every worker.
//!
//! The orchestrator never touches a physical filesystem directly. All
//! reads, writes, listings, shell commands and preview restarts go through
//! a [`Sandbox`]:
//!
//! | Implementation | Use case |
//! |----------------|----------|
//! | [`LocalSandbox`] | A directory on disk plus `sh -c` process execution |
//! | [`MemorySandbox`] | In-memory file map with scripted command output (tests) |
//!
//! Paths are relative to the sandbox root and use `/` separators. The
//! primitives return plain values (`bool`, `Option`, [`CommandOutput`])
//! rather than errors; failures are logged by the implementation.

mod local;
mod memory;

pub use local::LocalSandbox;
pub use memory::MemorySandbox;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A boxed future returned by [`Sandbox`] methods.
pub type SandboxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    /// Path relative to the sandbox root.
    pub path: String,
    pub is_dir: bool,
}

/// Captured output of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout and stderr joined, for diagnostics scanning.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Result of (re)starting the live preview process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Read/write/exec primitives over the shared output surface.
pub trait Sandbox: Send + Sync {
    /// Write `content` to `path`, creating parent directories. Returns
    /// `false` on failure.
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> SandboxFuture<'a, bool>;

    /// Read a file. `None` when it does not exist or cannot be read.
    fn read_file<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Option<String>>;

    /// Direct children of a directory, sorted by name. Empty when the
    /// directory does not exist.
    fn list_files<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Vec<Entry>>;

    /// Run a shell command at the sandbox root.
    fn run_command<'a>(&'a self, command: &'a str, timeout: Duration)
    -> SandboxFuture<'a, CommandOutput>;

    /// Start the live preview process, restarting it when already running.
    fn start_preview(&self) -> SandboxFuture<'_, PreviewStatus>;
}

/// Every file (not directory) under `path`, depth first, sorted by path.
pub async fn list_files_recursive(sandbox: &dyn Sandbox, path: &str) -> Vec<Entry> {
    let mut files = Vec::new();
    let mut pending = vec![path.to_string()];
    while let Some(dir) = pending.pop() {
        for entry in sandbox.list_files(&dir).await {
            if entry.is_dir {
                pending.push(entry.path);
            } else {
                files.push(entry);
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Reject absolute paths and `..` components.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty() && !path.starts_with('/') && !path.split('/').any(|c| c == "..")
}
