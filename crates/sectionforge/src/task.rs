//! Work orders: one [`Task`] per [`Section`].
//!
//! [`build_tasks`] is a pure function of its inputs. Every task gets a
//! namespace directory of its own under [`OutputLayout::sections_dir`] and
//! may only write inside it, which is what lets the orchestrator run all
//! tasks against one shared output surface without locking.

use crate::dom::StyleHints;
use crate::geometry::Rect;
use crate::partition::Section;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Layout ─────────────────────────────────────────────────────────

/// Where generated artifacts live on the output surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    /// Parent of every per-section namespace. Default: `src/sections`.
    pub sections_dir: String,
    /// Artifact each worker must produce inside its namespace. Default: `index.tsx`.
    pub artifact_file: String,
    /// Root composition artifact. Default: `src/App.tsx`.
    pub app_file: String,
    /// Consolidated style artifact. Default: `src/index.css`.
    pub styles_file: String,
    /// Dependency manifest. Default: `package.json`.
    pub manifest_file: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            sections_dir: "src/sections".into(),
            artifact_file: "index.tsx".into(),
            app_file: "src/App.tsx".into(),
            styles_file: "src/index.css".into(),
            manifest_file: "package.json".into(),
        }
    }
}

impl OutputLayout {
    pub fn with_sections_dir(mut self, dir: impl Into<String>) -> Self {
        self.sections_dir = dir.into();
        self
    }

    pub fn with_artifact_file(mut self, file: impl Into<String>) -> Self {
        self.artifact_file = file.into();
        self
    }

    /// Namespace directory for a section name, e.g. `src/sections/section_3`.
    pub fn section_dir(&self, name: &str) -> String {
        format!("{}/{name}", self.sections_dir.trim_end_matches('/'))
    }

    /// Expected artifact path for a section name.
    pub fn artifact_path(&self, name: &str) -> String {
        format!("{}/{}", self.section_dir(name), self.artifact_file)
    }
}

// ── Source context ─────────────────────────────────────────────────

/// Cross-cutting data shared by every task built from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Extracted CSS custom properties (`--brand` → `#0af`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub css_variables: BTreeMap<String, String>,
    /// Path of the preserved original stylesheet, if one was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<String>,
    /// Any other shared data handed to every worker verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shared: BTreeMap<String, serde_json::Value>,
}

impl SourceContext {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_css_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.css_variables.insert(name.into(), value.into());
        self
    }

    pub fn with_stylesheet(mut self, path: impl Into<String>) -> Self {
        self.stylesheet = Some(path.into());
        self
    }

    pub fn with_shared(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.shared.insert(key.into(), value);
        self
    }
}

// ── Task ───────────────────────────────────────────────────────────

/// Context payload handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub source_id: String,
    pub content: String,
    pub selector: String,
    pub rect: Rect,
    pub tokens: usize,
    #[serde(default)]
    pub oversized: bool,
    #[serde(default)]
    pub hints: StyleHints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub css_variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shared: BTreeMap<String, serde_json::Value>,
}

/// A dispatchable work order derived 1:1 from a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// The originating section's ordinal.
    pub id: usize,
    /// Canonical name, `section_<id>`.
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub context: TaskContext,
    /// Namespace directory the task owns.
    pub output_dir: String,
    /// Path prefixes the worker may write under.
    pub allowed_paths: Vec<String>,
    /// File the worker must produce for the section to be integrated.
    pub artifact_path: String,
}

impl Task {
    /// Component identifier for the section, e.g. `Section3`.
    pub fn component_name(&self) -> String {
        format!("Section{}", self.id)
    }

    /// Whether `path` lies inside one of the task's allowed prefixes.
    pub fn may_write(&self, path: &str) -> bool {
        if path.contains("..") {
            return false;
        }
        let path = normalize_path(path);
        self.allowed_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Strip `./` and leading `/` so sandbox-relative paths compare equal.
pub fn normalize_path(path: &str) -> &str {
    let mut p = path.trim_start_matches('/');
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.trim_start_matches('/');
    }
    p
}

/// Build one task per section, in section order.
pub fn build_tasks(sections: &[Section], source: &SourceContext, layout: &OutputLayout) -> Vec<Task> {
    sections
        .iter()
        .map(|section| build_task(section, source, layout))
        .collect()
}

fn build_task(section: &Section, source: &SourceContext, layout: &OutputLayout) -> Task {
    let name = section.name();
    let output_dir = layout.section_dir(&name);
    let artifact_path = layout.artifact_path(&name);
    let component = format!("Section{}", section.id);

    let mut description = format!(
        "Build section {id} of {source}: a {w:.0}x{h:.0}px region at y={y:.0} \
         ({selector}, ~{tokens} tokens of content). Export a default React component \
         named {component} from {artifact_path}. Write only inside {output_dir}/.",
        id = section.id,
        source = source.source_id,
        w = section.rect.width,
        h = section.rect.height,
        y = section.rect.top(),
        selector = section.selector,
        tokens = section.tokens,
    );
    if section.is_oversized() {
        description.push_str(
            " The content exceeds the usual section budget; summarize repeated \
             structures instead of reproducing them item by item.",
        );
    }

    Task {
        id: section.id,
        display_name: format!("Section {} ({})", section.id, section.selector),
        description,
        context: TaskContext {
            source_id: source.source_id.clone(),
            content: section.content.clone(),
            selector: section.selector.clone(),
            rect: section.rect,
            tokens: section.tokens,
            oversized: section.is_oversized(),
            hints: section.hints.clone(),
            base_url: source.base_url.clone(),
            css_variables: source.css_variables.clone(),
            stylesheet: source.stylesheet.clone(),
            shared: source.shared.clone(),
        },
        allowed_paths: vec![format!("{output_dir}/")],
        output_dir,
        artifact_path,
        name,
    }
}

/// Return the first pair of task names whose allowed paths overlap.
pub fn find_path_collision(tasks: &[Task]) -> Option<(String, String)> {
    for (i, a) in tasks.iter().enumerate() {
        for b in &tasks[i + 1..] {
            let collides = a.allowed_paths.iter().any(|pa| {
                b.allowed_paths
                    .iter()
                    .any(|pb| pa.starts_with(pb.as_str()) || pb.starts_with(pa.as_str()))
            });
            if collides {
                return Some((a.name.clone(), b.name.clone()));
            }
        }
    }
    None
}
