use super::{CommandOutput, Entry, PreviewStatus, Sandbox, SandboxFuture, is_safe_path};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Log file for the preview process, relative to the sandbox root.
const PREVIEW_LOG: &str = ".sectionforge/preview.log";

/// A sandbox rooted at a directory on the local disk.
///
/// Commands run through `sh -c` with the root as working directory. The
/// preview process (for example `npm run dev`) is optional; without one,
/// [`start_preview`](Sandbox::start_preview) reports failure.
pub struct LocalSandbox {
    root: PathBuf,
    preview_command: Option<String>,
    preview_url: Option<String>,
    preview: Mutex<Option<Child>>,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preview_command: None,
            preview_url: None,
            preview: Mutex::new(None),
        }
    }

    /// Command that serves the live preview, and the URL it serves on.
    pub fn with_preview(mut self, command: impl Into<String>, url: impl Into<String>) -> Self {
        self.preview_command = Some(command.into());
        self.preview_url = Some(url.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = path.trim_start_matches("./");
        if path.is_empty() || path == "." {
            return Some(self.root.clone());
        }
        is_safe_path(path).then(|| self.root.join(path))
    }

    async fn stop_preview(&self, slot: &mut Option<Child>) {
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.start_kill() {
                debug!("Preview process already exited: {e}");
            }
            let _ = child.wait().await;
        }
    }
}

impl Sandbox for LocalSandbox {
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> SandboxFuture<'a, bool> {
        Box::pin(async move {
            let Some(full) = self.resolve(path) else {
                warn!("Refusing to write outside sandbox: {path}");
                return false;
            };
            if let Some(parent) = full.parent()
                && let Err(e) = fs::create_dir_all(parent).await
            {
                warn!("Failed to create {}: {e}", parent.display());
                return false;
            }
            match fs::write(&full, content).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to write {}: {e}", full.display());
                    false
                }
            }
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Option<String>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            fs::read_to_string(&full).await.ok()
        })
    }

    fn list_files<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Vec<Entry>> {
        Box::pin(async move {
            let Some(full) = self.resolve(path) else {
                return Vec::new();
            };
            let Ok(mut dir) = fs::read_dir(&full).await else {
                return Vec::new();
            };
            let prefix = path.trim_start_matches("./").trim_end_matches('/');
            let mut entries = Vec::new();
            while let Ok(Some(entry)) = dir.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                let rel = if prefix.is_empty() || prefix == "." {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                entries.push(Entry {
                    name,
                    path: rel,
                    is_dir,
                });
            }
            entries.sort();
            entries
        })
    }

    fn run_command<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
    ) -> SandboxFuture<'a, CommandOutput> {
        Box::pin(async move {
            debug!("Running in {}: {command}", self.root.display());
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(command)
                .current_dir(&self.root)
                .kill_on_drop(true);
            match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(Ok(output)) => CommandOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
                Ok(Err(e)) => CommandOutput::failed(format!("Error running command: {e}")),
                Err(_) => CommandOutput::failed(format!(
                    "Command timed out after {:.1}s",
                    timeout.as_secs_f64()
                )),
            }
        })
    }

    fn start_preview(&self) -> SandboxFuture<'_, PreviewStatus> {
        Box::pin(async move {
            let Some(command) = self.preview_command.as_deref() else {
                debug!("No preview command configured");
                return PreviewStatus::default();
            };

            let mut slot = self.preview.lock().await;
            self.stop_preview(&mut slot).await;

            let log_path = self.root.join(PREVIEW_LOG);
            if let Some(parent) = log_path.parent() {
                let _ = fs::create_dir_all(parent).await;
            }
            let (stdout, stderr) = match std::fs::File::create(&log_path)
                .and_then(|f| f.try_clone().map(|g| (f, g)))
            {
                Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
                Err(e) => {
                    warn!("Cannot open preview log {}: {e}", log_path.display());
                    (Stdio::null(), Stdio::null())
                }
            };

            match Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.root)
                .stdout(stdout)
                .stderr(stderr)
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => {
                    info!("Preview started: {command}");
                    *slot = Some(child);
                    PreviewStatus {
                        success: true,
                        url: self.preview_url.clone(),
                    }
                }
                Err(e) => {
                    warn!("Failed to start preview: {e}");
                    PreviewStatus::default()
                }
            }
        })
    }
}
