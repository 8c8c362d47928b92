//! Invocation guard: at most one successful dispatch per (tool, source).
//!
//! Re-running a full parallel build against a shared output surface
//! rewrites every section at once. The guard keeps an append-only log of
//! [`InvocationRecord`]s and answers "may this tool run for this source?"
//! according to a per-tool [`InvocationPolicy`].
//!
//! The check and the reservation happen in one critical section:
//! [`InvocationGuard::try_acquire`] checks the policy and marks the
//! (tool, source) pair in flight under the same lock, returning an
//! [`InvocationPermit`]. A second caller racing for the same pair is
//! rejected with [`RejectionReason::InFlight`] rather than slipping through
//! between check and record. Completing the permit appends the outcome to
//! the log; dropping it without completing records a failure.
//!
//! ```
//! use sectionforge::guard::{InvocationGuard, InvocationPolicy};
//!
//! let guard = InvocationGuard::new().with_policy("dispatch_sections", InvocationPolicy::OncePerSource);
//! let permit = guard.try_acquire("dispatch_sections", "example.com").unwrap();
//! permit.complete(true, serde_json::json!({"tasks": 4}));
//!
//! assert!(!guard.can_invoke("dispatch_sections", "example.com"));
//! assert!(guard.can_invoke("dispatch_sections", "other.com"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Tool name recorded for full dispatches.
pub const DISPATCH_TOOL: &str = "dispatch_sections";

/// Tool name recorded for scoped retries.
pub const RETRY_TOOL: &str = "retry_sections";

/// When a tool may run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationPolicy {
    /// Always permitted.
    #[default]
    Unlimited,
    /// Permitted until the first successful invocation, for any source.
    OncePerSession,
    /// Permitted until the first successful invocation for that source.
    OncePerSource,
}

/// One completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub success: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Why an invocation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// A previous invocation already succeeded.
    AlreadyInvoked,
    /// Another invocation for the same pair has not finished yet.
    InFlight,
}

/// A refused invocation, with enough detail to tell the caller what to do instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardRejection {
    pub tool: String,
    pub source_id: String,
    pub policy: InvocationPolicy,
    pub reason: RejectionReason,
    /// Timestamp of the last successful invocation, when there is one.
    pub last_success: Option<DateTime<Utc>>,
}

impl std::fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            RejectionReason::AlreadyInvoked => {
                write!(f, "{} already completed for '{}'", self.tool, self.source_id)?;
                if let Some(ts) = self.last_success {
                    write!(f, " at {}", ts.format("%Y-%m-%d %H:%M:%S UTC"))?;
                }
                write!(
                    f,
                    ". Dispatching again would rebuild every section. \
                     Use {RETRY_TOOL} to re-run only the failed sections."
                )
            }
            RejectionReason::InFlight => write!(
                f,
                "{} is already running for '{}'. Wait for it to finish, \
                 then use {RETRY_TOOL} for any sections that failed.",
                self.tool, self.source_id
            ),
        }
    }
}

impl std::error::Error for GuardRejection {}

#[derive(Default)]
struct GuardState {
    records: Vec<InvocationRecord>,
    in_flight: HashSet<(String, String)>,
}

impl GuardState {
    fn record(&mut self, tool: &str, source_id: &str, success: bool, metadata: serde_json::Value) {
        self.records.push(InvocationRecord {
            tool: tool.to_string(),
            timestamp: Utc::now(),
            source_id: source_id.to_string(),
            success,
            metadata,
        });
    }
}

/// Policy-driven gate over tool invocations. Share it behind an `Arc`.
#[derive(Default)]
pub struct InvocationGuard {
    policies: HashMap<String, InvocationPolicy>,
    default_policy: InvocationPolicy,
    state: Mutex<GuardState>,
}

impl InvocationGuard {
    /// A guard where every tool is [`InvocationPolicy::Unlimited`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, tool: impl Into<String>, policy: InvocationPolicy) -> Self {
        self.policies.insert(tool.into(), policy);
        self
    }

    /// Policy for tools without an explicit entry.
    pub fn with_default_policy(mut self, policy: InvocationPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policy_for(&self, tool: &str) -> InvocationPolicy {
        self.policies
            .get(tool)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Whether `tool` may run for `source_id` right now.
    pub fn can_invoke(&self, tool: &str, source_id: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.check(&state, tool, source_id).is_ok()
    }

    /// Check the policy and reserve the pair in one step.
    pub fn try_acquire(
        &self,
        tool: &str,
        source_id: &str,
    ) -> Result<InvocationPermit<'_>, GuardRejection> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.check(&state, tool, source_id)?;
        state.in_flight.insert(self.reservation(tool, source_id));
        debug!("Guard acquired: {tool} for {source_id}");
        Ok(InvocationPermit {
            guard: self,
            tool: tool.to_string(),
            source_id: source_id.to_string(),
            completed: false,
        })
    }

    /// Append an invocation outcome to the log.
    pub fn mark_invoked(
        &self,
        tool: &str,
        source_id: &str,
        success: bool,
        metadata: serde_json::Value,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.record(tool, source_id, success, metadata);
    }

    /// Forget recorded invocations of `tool`, or of every tool when `None`.
    /// In-flight reservations are left alone.
    pub fn reset(&self, tool: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match tool {
            Some(t) => state.records.retain(|r| r.tool != t),
            None => state.records.clear(),
        }
    }

    /// Snapshot of the invocation log, oldest first.
    pub fn records(&self) -> Vec<InvocationRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.clone()
    }

    /// Timestamp of the last successful invocation of `tool` for `source_id`.
    pub fn last_success(&self, tool: &str, source_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        last_success_in(&state.records, tool, Some(source_id))
    }

    fn check(&self, state: &GuardState, tool: &str, source_id: &str) -> Result<(), GuardRejection> {
        let policy = self.policy_for(tool);
        if policy == InvocationPolicy::Unlimited {
            return Ok(());
        }
        let reject = |reason: RejectionReason, last_success: Option<DateTime<Utc>>| GuardRejection {
            tool: tool.to_string(),
            source_id: source_id.to_string(),
            policy,
            reason,
            last_success,
        };

        if state.in_flight.contains(&self.reservation(tool, source_id)) {
            return Err(reject(RejectionReason::InFlight, None));
        }

        let scope = match policy {
            InvocationPolicy::OncePerSource => Some(source_id),
            _ => None,
        };
        match last_success_in(&state.records, tool, scope) {
            Some(ts) => Err(reject(RejectionReason::AlreadyInvoked, Some(ts))),
            None => Ok(()),
        }
    }

    /// In-flight key for a pair. Session-wide tools reserve the tool for
    /// every source at once.
    fn reservation(&self, tool: &str, source_id: &str) -> (String, String) {
        match self.policy_for(tool) {
            InvocationPolicy::OncePerSession => (tool.to_string(), String::new()),
            _ => (tool.to_string(), source_id.to_string()),
        }
    }

    fn release(&self, tool: &str, source_id: &str, success: bool, metadata: serde_json::Value) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight.remove(&self.reservation(tool, source_id));
        state.record(tool, source_id, success, metadata);
    }
}

fn last_success_in(
    records: &[InvocationRecord],
    tool: &str,
    source_id: Option<&str>,
) -> Option<DateTime<Utc>> {
    records
        .iter()
        .rev()
        .find(|r| r.success && r.tool == tool && source_id.is_none_or(|s| r.source_id == s))
        .map(|r| r.timestamp)
}

/// A reserved invocation. Call [`complete`](Self::complete) with the outcome.
pub struct InvocationPermit<'g> {
    guard: &'g InvocationGuard,
    tool: String,
    source_id: String,
    completed: bool,
}

impl InvocationPermit<'_> {
    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Release the reservation and record the outcome.
    pub fn complete(mut self, success: bool, metadata: serde_json::Value) {
        self.guard
            .release(&self.tool, &self.source_id, success, metadata);
        self.completed = true;
    }
}

impl Drop for InvocationPermit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.guard.release(
                &self.tool,
                &self.source_id,
                false,
                serde_json::json!({"aborted": true}),
            );
        }
    }
}
