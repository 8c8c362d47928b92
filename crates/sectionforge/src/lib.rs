//! Partition a rendered page into token-bounded sections and build them in parallel.
//!
//! `sectionforge` takes a DOM snapshot (tags, pixel rectangles, content
//! lengths) captured by an upstream extractor, cuts it into visually
//! coherent [`Section`](partition::Section)s small enough for a generation
//! budget, turns each section into a namespaced [`Task`](task::Task), and
//! runs every task concurrently on a [`Worker`](worker::Worker). The
//! resulting per-section artifacts are composed into one app, missing
//! packages are installed and the live preview is restarted.
//!
//! # Getting started
//!
//! ```ignore
//! use sectionforge::prelude::*;
//! use std::sync::Arc;
//!
//! let snapshot = DomSnapshot::from_json(&json)?;
//! let partition = partition_snapshot(&snapshot, &PartitionConfig::default());
//! let tasks = build_tasks(
//!     &partition.sections,
//!     &SourceContext::new("example.com"),
//!     &OutputLayout::default(),
//! );
//!
//! let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new("./site"));
//! let worker = Arc::new(CommandWorker::new(sandbox.clone(), "agent {{task_file}}"));
//! let orchestrator = Orchestrator::new(sandbox, worker)
//!     .with_event_handler(Arc::new(LoggingHandler));
//!
//! let summary = orchestrator.dispatch(tasks, "example.com").await?;
//! if let Some(next) = summary.next_action {
//!     println!("{next}");
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dom`] | Extractor input: [`DomNode`](dom::DomNode), [`DomSnapshot`](dom::DomSnapshot) |
//! | [`geometry`] | [`Rect`](geometry::Rect), overlap and coverage measures, token estimation |
//! | [`partition`] | [`partition()`](partition::partition): candidates, splitting, ordering, overlap removal, gap merging, validation |
//! | [`task`] | [`build_tasks()`](task::build_tasks) and output namespacing |
//! | [`guard`] | [`InvocationGuard`](guard::InvocationGuard): one successful dispatch per source |
//! | [`sandbox`] | [`Sandbox`](sandbox::Sandbox) trait, on-disk and in-memory implementations |
//! | [`worker`] | [`Worker`](worker::Worker) trait, command worker, scoped worker actions |
//! | [`manifest`] | `package.json` access |
//! | [`orchestrator`] | [`Orchestrator`](orchestrator::Orchestrator): dispatch, retry, integration, dependency repair |
//! | [`error`] | [`BuildError`](error::BuildError) |

pub mod dom;
pub mod error;
pub mod geometry;
pub mod guard;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod prelude;
pub mod sandbox;
pub mod task;
pub mod worker;
