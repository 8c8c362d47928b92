//! Convenience re-exports for common `sectionforge` types.
//!
//! ```ignore
//! use sectionforge::prelude::*;
//! ```
//!
//! Partition stages, integration internals and dependency scanning helpers
//! are left out; import those from their modules directly.

// ── Input and partitioning ──────────────────────────────────────────
pub use crate::dom::{DomNode, DomSnapshot, PageSize, StyleHints};
pub use crate::geometry::Rect;
pub use crate::partition::{
    Diagnostic, OversizeReason, Partition, PartitionConfig, Section, partition,
    partition_snapshot,
};

// ── Tasks and guard ─────────────────────────────────────────────────
pub use crate::guard::{InvocationGuard, InvocationPolicy};
pub use crate::task::{OutputLayout, SourceContext, Task, build_tasks};

// ── Execution ───────────────────────────────────────────────────────
pub use crate::sandbox::{LocalSandbox, MemorySandbox, Sandbox};
pub use crate::worker::{CommandWorker, FnWorker, Worker, WorkerResult, WorkerTool};

// ── Orchestration ───────────────────────────────────────────────────
pub use crate::error::BuildError;
pub use crate::orchestrator::{
    BuildEvent, BuildSummary, DependencyConfig, EventHandler,
    FnEventHandler, LoggingHandler, NoopHandler, Orchestrator, OrchestratorConfig, RunState,
    RunStatus,
};
