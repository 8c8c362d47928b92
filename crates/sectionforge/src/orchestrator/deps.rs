//! Dependency repair after a dispatch.
//!
//! Two independent checks run once the workers are done:
//!
//! 1. **Missing packages.** Newly written source files are scanned for
//!    bare module specifiers (`import x from 'pkg'`, `require("pkg")`,
//!    `import("pkg")`). Packages the manifest does not declare are installed
//!    in one command, then declared in the manifest if the installer did not
//!    do so itself.
//! 2. **Cache corruption.** Recent preview diagnostics are scanned for known
//!    corruption signatures. On a match the dependency cache is rebuilt and
//!    the preview restarted.
//!
//! Failures are recorded as [`DependencyAction`] variants, never raised.

use crate::manifest::PackageManifest;
use crate::sandbox::Sandbox;
use crate::worker::shell_quote;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*(?:import|export)\s+(?:type\s+)?(?:[\w*{}\s,$]+?\s+from\s+)?['"]([^'"]+)['"]"#,
    )
    .expect("IMPORT_RE regex should compile")
});

static DYNAMIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("DYNAMIC_IMPORT_RE regex should compile")
});

static PACKAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$")
        .expect("PACKAGE_NAME_RE regex should compile")
});

/// Node built-in modules, never installed.
const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "dns",
    "events",
    "fs",
    "http",
    "https",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "timers",
    "tls",
    "url",
    "util",
    "worker_threads",
    "zlib",
];

/// File extensions scanned for module references.
const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// Version recorded for packages the installer did not declare itself.
const FALLBACK_VERSION: &str = "latest";

// ── Configuration ──────────────────────────────────────────────────

/// Commands and signatures used by [`repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Install command; `{packages}` is replaced by the quoted package list.
    pub install_command: String,
    /// Prints recent preview/build diagnostics.
    pub diagnostics_command: String,
    /// Substrings in the diagnostics that indicate a corrupt dependency cache.
    pub corruption_signatures: Vec<String>,
    /// Rebuilds the dependency cache from scratch.
    pub reinstall_command: String,
    pub timeout: Duration,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            install_command: "npm install {packages}".into(),
            diagnostics_command: "tail -n 200 .sectionforge/preview.log 2>/dev/null".into(),
            corruption_signatures: vec![
                "Outdated Optimize Dep".into(),
                "ERR_MODULE_NOT_FOUND".into(),
                "The file does not exist at".into(),
                "node_modules/.vite/deps".into(),
            ],
            reinstall_command: "rm -rf node_modules/.vite && npm install".into(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl DependencyConfig {
    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install command line for `packages`.
    pub fn render_install(&self, packages: &[String]) -> String {
        let quoted: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        self.install_command.replace("{packages}", &quoted.join(" "))
    }

    /// First corruption signature found in `diagnostics`.
    pub fn detect_corruption(&self, diagnostics: &str) -> Option<&str> {
        self.corruption_signatures
            .iter()
            .find(|s| diagnostics.contains(s.as_str()))
            .map(String::as_str)
    }
}

// ── Actions ────────────────────────────────────────────────────────

/// One thing dependency repair did (or failed to do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DependencyAction {
    Installed { packages: Vec<String> },
    InstallFailed { packages: Vec<String>, error: String },
    Reinstalled { signature: String, preview_url: Option<String> },
    ReinstallFailed { signature: String, error: String },
    ManifestUpdateFailed { error: String },
}

impl DependencyAction {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DependencyAction::InstallFailed { .. }
                | DependencyAction::ReinstallFailed { .. }
                | DependencyAction::ManifestUpdateFailed { .. }
        )
    }
}

impl std::fmt::Display for DependencyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyAction::Installed { packages } => {
                write!(f, "installed {}", packages.join(", "))
            }
            DependencyAction::InstallFailed { packages, error } => {
                write!(f, "failed to install {}: {error}", packages.join(", "))
            }
            DependencyAction::Reinstalled { signature, .. } => {
                write!(f, "reinstalled dependencies after '{signature}'")
            }
            DependencyAction::ReinstallFailed { signature, error } => {
                write!(f, "reinstall after '{signature}' failed: {error}")
            }
            DependencyAction::ManifestUpdateFailed { error } => {
                write!(f, "manifest update failed: {error}")
            }
        }
    }
}

// ── Scanning ───────────────────────────────────────────────────────

/// Package name for a module specifier, or `None` for relative paths,
/// aliases, URLs and built-ins.
///
/// `lodash/debounce` → `lodash`, `@radix-ui/react-dialog/dist` →
/// `@radix-ui/react-dialog`.
pub fn package_name(specifier: &str) -> Option<String> {
    let spec = specifier.trim();
    if spec.is_empty()
        || spec.starts_with('.')
        || spec.starts_with('/')
        || spec.starts_with("@/")
        || spec.starts_with('~')
        || spec.starts_with('#')
        || spec.contains(':')
    {
        return None;
    }
    let mut parts = spec.split('/');
    let first = parts.next()?;
    let name = if first.starts_with('@') {
        format!("{first}/{}", parts.next()?)
    } else {
        first.to_string()
    };
    if BUILTIN_MODULES.contains(&name.as_str()) || !PACKAGE_NAME_RE.is_match(&name) {
        return None;
    }
    Some(name)
}

/// External packages referenced by one source file.
pub fn scan_imports(source: &str) -> BTreeSet<String> {
    IMPORT_RE
        .captures_iter(source)
        .chain(DYNAMIC_IMPORT_RE.captures_iter(source))
        .filter_map(|c| c.get(1))
        .filter_map(|m| package_name(m.as_str()))
        .collect()
}

fn is_source_file(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| SOURCE_EXTENSIONS.contains(&ext))
}

/// External packages referenced by the written files. Files reported
/// without content are read back from the sandbox.
pub async fn referenced_packages(
    sandbox: &dyn Sandbox,
    files: &BTreeMap<String, Option<String>>,
) -> BTreeSet<String> {
    let mut packages = BTreeSet::new();
    for (path, content) in files {
        if !is_source_file(path) {
            continue;
        }
        let source = match content {
            Some(c) => Some(c.clone()),
            None => sandbox.read_file(path).await,
        };
        match source {
            Some(s) => packages.extend(scan_imports(&s)),
            None => debug!("Skipping unreadable {path}"),
        }
    }
    packages
}

// ── Repair ─────────────────────────────────────────────────────────

/// Install missing packages, then check for cache corruption.
pub async fn repair(
    sandbox: &dyn Sandbox,
    config: &DependencyConfig,
    manifest_path: &str,
    files: &BTreeMap<String, Option<String>>,
) -> Vec<DependencyAction> {
    let mut actions = Vec::new();

    let referenced = referenced_packages(sandbox, files).await;
    if !referenced.is_empty() {
        install_missing(sandbox, config, manifest_path, &referenced, &mut actions).await;
    }
    if let Some(action) = repair_corruption(sandbox, config).await {
        actions.push(action);
    }
    actions
}

async fn install_missing(
    sandbox: &dyn Sandbox,
    config: &DependencyConfig,
    manifest_path: &str,
    referenced: &BTreeSet<String>,
    actions: &mut Vec<DependencyAction>,
) {
    let manifest = match PackageManifest::load(sandbox, manifest_path).await {
        Ok(m) => m,
        Err(error) => {
            warn!("Cannot read {manifest_path}: {error}");
            actions.push(DependencyAction::ManifestUpdateFailed { error });
            return;
        }
    };
    let missing = manifest.missing(referenced.iter().map(String::as_str));
    if missing.is_empty() {
        debug!("All {} referenced packages are declared", referenced.len());
        return;
    }

    info!("Installing missing packages: {}", missing.join(", "));
    let output = sandbox
        .run_command(&config.render_install(&missing), config.timeout)
        .await;
    if !output.success {
        warn!("Install failed: {}", output.stderr.trim());
        actions.push(DependencyAction::InstallFailed {
            packages: missing,
            error: output.stderr.trim().to_string(),
        });
        return;
    }
    actions.push(DependencyAction::Installed {
        packages: missing.clone(),
    });

    // Re-read: most installers declare what they install.
    let mut manifest = match PackageManifest::load(sandbox, manifest_path).await {
        Ok(m) => m,
        Err(_) => manifest,
    };
    let undeclared = manifest.missing(missing.iter().map(String::as_str));
    if undeclared.is_empty() {
        return;
    }
    for package in undeclared {
        manifest.add(package, FALLBACK_VERSION);
    }
    if let Err(error) = manifest.save(sandbox, manifest_path).await {
        warn!("Cannot update {manifest_path}: {error}");
        actions.push(DependencyAction::ManifestUpdateFailed { error });
    }
}

async fn repair_corruption(
    sandbox: &dyn Sandbox,
    config: &DependencyConfig,
) -> Option<DependencyAction> {
    let diagnostics = sandbox
        .run_command(&config.diagnostics_command, config.timeout)
        .await;
    let signature = config.detect_corruption(&diagnostics.combined())?.to_string();

    warn!("Dependency cache corruption detected ({signature}); reinstalling");
    let output = sandbox
        .run_command(&config.reinstall_command, config.timeout)
        .await;
    if !output.success {
        return Some(DependencyAction::ReinstallFailed {
            signature,
            error: output.stderr.trim().to_string(),
        });
    }
    let preview = sandbox.start_preview().await;
    if !preview.success {
        return Some(DependencyAction::ReinstallFailed {
            signature,
            error: "preview did not restart after reinstall".into(),
        });
    }
    info!("Dependencies reinstalled and preview restarted");
    Some(DependencyAction::Reinstalled {
        signature,
        preview_url: preview.url,
    })
}
