use super::{CommandOutput, Entry, PreviewStatus, Sandbox, SandboxFuture, is_safe_path};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// An in-memory sandbox.
///
/// Files live in a sorted map. Commands are recorded and answered from a
/// list of scripted responses matched by command prefix (first match
/// wins); unmatched commands succeed with empty output. Preview restarts
/// are counted.
pub struct MemorySandbox {
    files: Mutex<BTreeMap<String, String>>,
    commands: Mutex<Vec<String>>,
    responses: Vec<(String, CommandOutput)>,
    preview_url: Option<String>,
    preview_starts: AtomicUsize,
}

impl Default for MemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(Vec::new()),
            responses: Vec::new(),
            preview_url: Some("http://localhost:5173".into()),
            preview_starts: AtomicUsize::new(0),
        }
    }

    /// Seed a file.
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path: String = path.into();
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(normalize(&path).to_string(), content.into());
        self
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn with_response(mut self, prefix: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.push((prefix.into(), output));
        self
    }

    /// Make [`start_preview`](Sandbox::start_preview) fail.
    pub fn without_preview(mut self) -> Self {
        self.preview_url = None;
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(normalize(path))
            .cloned()
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn preview_starts(&self) -> usize {
        self.preview_starts.load(Ordering::SeqCst)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_end_matches('/')
}

impl Sandbox for MemorySandbox {
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> SandboxFuture<'a, bool> {
        Box::pin(async move {
            let path = normalize(path);
            if !is_safe_path(path) {
                return false;
            }
            self.files
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path.to_string(), content.to_string());
            true
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Option<String>> {
        Box::pin(async move { self.file(path) })
    }

    fn list_files<'a>(&'a self, path: &'a str) -> SandboxFuture<'a, Vec<Entry>> {
        Box::pin(async move {
            let dir = normalize(path);
            let prefix = if dir.is_empty() || dir == "." {
                String::new()
            } else {
                format!("{dir}/")
            };
            let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
            let mut seen = BTreeSet::new();
            let mut entries = Vec::new();
            for key in files.keys() {
                let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                let (name, is_dir) = match rest.split_once('/') {
                    Some((first, _)) => (first, true),
                    None => (rest, false),
                };
                if seen.insert(name.to_string()) {
                    entries.push(Entry {
                        name: name.to_string(),
                        path: format!("{prefix}{name}"),
                        is_dir,
                    });
                }
            }
            entries.sort();
            entries
        })
    }

    fn run_command<'a>(
        &'a self,
        command: &'a str,
        _timeout: Duration,
    ) -> SandboxFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.commands
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.to_string());
            self.responses
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_else(|| CommandOutput::ok(""))
        })
    }

    fn start_preview(&self) -> SandboxFuture<'_, PreviewStatus> {
        Box::pin(async move {
            self.preview_starts.fetch_add(1, Ordering::SeqCst);
            PreviewStatus {
                success: self.preview_url.is_some(),
                url: self.preview_url.clone(),
            }
        })
    }
}
