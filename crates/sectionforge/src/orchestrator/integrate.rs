//! Auto-integration: compose the per-section artifacts into one app.
//!
//! After every worker has finished, the sections directory is scanned for
//! namespaces named `section_<n>`. Each one that belongs to the run and
//! holds the expected artifact is integrated, in section order, into a
//! root composition file. A consolidated stylesheet is written alongside.
//! A task that succeeded without leaving its artifact behind is an
//! [`IntegrationGap`]; it does not fail the run.

use crate::sandbox::Sandbox;
use crate::task::{OutputLayout, Task};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static SECTION_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^section_(\d+)$").expect("SECTION_DIR_RE regex should compile"));

/// A successful task whose expected artifact is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationGap {
    pub task_id: usize,
    pub name: String,
    /// The artifact path that was not found.
    pub expected: String,
}

/// What one integration pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    /// Integrated section ids, in section order.
    pub integrated: Vec<usize>,
    pub gaps: Vec<IntegrationGap>,
    /// Composition and style files written.
    pub written: Vec<String>,
    /// Writes that failed.
    pub errors: Vec<String>,
}

/// Style inputs for the consolidated stylesheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleInputs {
    pub css_variables: BTreeMap<String, String>,
    /// Preserved original stylesheet, imported first.
    pub stylesheet: Option<String>,
}

impl StyleInputs {
    /// Style inputs carried by a run's tasks (all tasks share them).
    pub fn from_tasks(tasks: &[Task]) -> Self {
        tasks
            .first()
            .map(|t| Self {
                css_variables: t.context.css_variables.clone(),
                stylesheet: t.context.stylesheet.clone(),
            })
            .unwrap_or_default()
    }
}

/// Scan, then write the composition and style artifacts.
///
/// `succeeded` holds the ids of tasks whose latest worker result was a
/// success; only those can produce gaps.
pub async fn integrate(
    sandbox: &dyn Sandbox,
    layout: &OutputLayout,
    tasks: &[Task],
    succeeded: &BTreeSet<usize>,
    styles: &StyleInputs,
) -> IntegrationReport {
    let present = scan_sections(sandbox, layout).await;
    let mut report = IntegrationReport::default();

    for task in tasks {
        if present.contains(&task.id) {
            report.integrated.push(task.id);
        } else if succeeded.contains(&task.id) {
            warn!("{} succeeded but {} is missing", task.name, task.artifact_path);
            report.gaps.push(IntegrationGap {
                task_id: task.id,
                name: task.name.clone(),
                expected: task.artifact_path.clone(),
            });
        }
    }
    report.integrated.sort_unstable();

    let stale: Vec<usize> = present
        .iter()
        .filter(|id| !tasks.iter().any(|t| t.id == **id))
        .copied()
        .collect();
    if !stale.is_empty() {
        debug!("Ignoring section directories outside this run: {stale:?}");
    }

    let app = render_app(layout, &report.integrated);
    write(sandbox, &layout.app_file, &app, &mut report).await;
    let css = render_styles(layout, styles);
    write(sandbox, &layout.styles_file, &css, &mut report).await;

    info!(
        "Integrated {} sections ({} gaps)",
        report.integrated.len(),
        report.gaps.len()
    );
    report
}

async fn write(sandbox: &dyn Sandbox, path: &str, content: &str, report: &mut IntegrationReport) {
    if sandbox.write_file(path, content).await {
        report.written.push(path.to_string());
    } else {
        report.errors.push(format!("failed to write {path}"));
    }
}

/// Section ids whose namespace directory holds the expected artifact.
pub async fn scan_sections(sandbox: &dyn Sandbox, layout: &OutputLayout) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    for entry in sandbox.list_files(&layout.sections_dir).await {
        if !entry.is_dir {
            continue;
        }
        let Some(id) = SECTION_DIR_RE
            .captures(&entry.name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
        else {
            continue;
        };
        let has_artifact = sandbox
            .list_files(&entry.path)
            .await
            .iter()
            .any(|f| !f.is_dir && f.name == layout.artifact_file);
        if has_artifact {
            found.insert(id);
        }
    }
    found
}

/// Root composition rendering every integrated section in order.
pub fn render_app(layout: &OutputLayout, integrated: &[usize]) -> String {
    let mut out = String::new();
    for id in integrated {
        let target = layout.artifact_path(&format!("section_{id}"));
        out.push_str(&format!(
            "import Section{id} from '{}';\n",
            module_specifier(&layout.app_file, &target)
        ));
    }
    if !integrated.is_empty() {
        out.push('\n');
    }
    out.push_str("export default function App() {\n  return (\n    <main>\n");
    for id in integrated {
        out.push_str(&format!("      <Section{id} />\n"));
    }
    out.push_str("    </main>\n  );\n}\n");
    out
}

/// Consolidated stylesheet: preserved original first, then variables and resets.
pub fn render_styles(layout: &OutputLayout, styles: &StyleInputs) -> String {
    let mut out = String::new();
    if let Some(ref sheet) = styles.stylesheet {
        out.push_str(&format!(
            "@import '{}';\n\n",
            relative_path(&layout.styles_file, sheet)
        ));
    }
    if !styles.css_variables.is_empty() {
        out.push_str(":root {\n");
        for (name, value) in &styles.css_variables {
            let name = if name.starts_with("--") {
                name.clone()
            } else {
                format!("--{name}")
            };
            out.push_str(&format!("  {name}: {value};\n"));
        }
        out.push_str("}\n\n");
    }
    out.push_str(BASE_RESETS);
    out
}

const BASE_RESETS: &str = "\
*,
*::before,
*::after {
  box-sizing: border-box;
}

html,
body {
  margin: 0;
  padding: 0;
}

img,
picture,
video,
svg {
  display: block;
  max-width: 100%;
}
";

/// Relative path from the directory of `from_file` to `to`.
pub fn relative_path(from_file: &str, to: &str) -> String {
    let from_dir: Vec<&str> = from_file
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let target: Vec<&str> = to.split('/').filter(|c| !c.is_empty() && *c != ".").collect();

    let common = from_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from_dir.len() - common;
    let rest = target[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

/// Import specifier for a module: relative, without extension or `/index`.
pub fn module_specifier(from_file: &str, to: &str) -> String {
    let rel = relative_path(from_file, to);
    let without_ext = match rel.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !stem.is_empty() && !stem.ends_with('.') => {
            stem.to_string()
        }
        _ => rel,
    };
    without_ext
        .strip_suffix("/index")
        .map(str::to_string)
        .unwrap_or(without_ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::partition::Section;
    use crate::sandbox::MemorySandbox;
    use crate::task::{SourceContext, build_tasks};

    fn tasks(n: usize) -> Vec<Task> {
        let sections: Vec<Section> = (1..=n)
            .map(|id| Section {
                id,
                rect: Rect::new(0.0, id as f64 * 100.0, 1200.0, 100.0),
                tokens: 100,
                content: String::new(),
                selector: "div".into(),
                hints: Default::default(),
                oversize: None,
                depth: 0,
            })
            .collect();
        build_tasks(&sections, &SourceContext::new("s"), &OutputLayout::default())
    }

    #[test]
    fn module_specifiers_are_relative() {
        assert_eq!(
            module_specifier("src/App.tsx", "src/sections/section_2/index.tsx"),
            "./sections/section_2"
        );
        assert_eq!(
            module_specifier("src/app/App.tsx", "src/sections/section_2/Hero.tsx"),
            "../sections/section_2/Hero"
        );
        assert_eq!(relative_path("src/index.css", "public/original.css"), "../public/original.css");
        assert_eq!(relative_path("src/index.css", "src/original.css"), "./original.css");
    }

    #[test]
    fn app_renders_sections_in_order() {
        let app = render_app(&OutputLayout::default(), &[1, 3]);
        assert!(app.starts_with(
            "import Section1 from './sections/section_1';\nimport Section3 from './sections/section_3';\n"
        ));
        let first = app.find("<Section1 />").unwrap();
        let second = app.find("<Section3 />").unwrap();
        assert!(first < second);
        assert!(!app.contains("Section2"));
    }

    #[test]
    fn styles_import_original_first() {
        let styles = StyleInputs {
            css_variables: BTreeMap::from([
                ("--brand".to_string(), "#0af".to_string()),
                ("gap".to_string(), "8px".to_string()),
            ]),
            stylesheet: Some("src/original.css".into()),
        };
        let css = render_styles(&OutputLayout::default(), &styles);
        assert!(css.starts_with("@import './original.css';"));
        assert!(css.contains("  --brand: #0af;\n"));
        assert!(css.contains("  --gap: 8px;\n"));
        assert!(css.contains("box-sizing: border-box"));
    }

    #[tokio::test]
    async fn missing_artifacts_become_gaps() {
        let sandbox = MemorySandbox::new()
            .with_file("src/sections/section_1/index.tsx", "export default () => null;")
            .with_file("src/sections/section_2/Other.tsx", "x")
            .with_file("src/sections/section_9/index.tsx", "stale")
            .with_file("src/sections/notes.md", "x");
        let tasks = tasks(3);
        let succeeded = BTreeSet::from([1, 2]);

        let report = integrate(
            &sandbox,
            &OutputLayout::default(),
            &tasks,
            &succeeded,
            &StyleInputs::default(),
        )
        .await;

        assert_eq!(report.integrated, vec![1]);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].task_id, 2);
        assert_eq!(report.gaps[0].expected, "src/sections/section_2/index.tsx");
        assert_eq!(report.written, vec!["src/App.tsx", "src/index.css"]);

        let app = sandbox.file("src/App.tsx").unwrap();
        assert!(app.contains("<Section1 />"));
        assert!(!app.contains("Section9"));
    }

    #[tokio::test]
    async fn sections_are_integrated_in_numeric_order() {
        let mut sandbox = MemorySandbox::new();
        for id in [10, 2, 1] {
            sandbox = sandbox.with_file(format!("src/sections/section_{id}/index.tsx"), "x");
        }
        let found = scan_sections(&sandbox, &OutputLayout::default()).await;
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2, 10]);
    }
}
