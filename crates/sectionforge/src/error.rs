//! Hard failures that abort an orchestrator call before any work starts.
//!
//! Everything that can go wrong once dispatch is under way (a worker
//! failing or timing out, a missing artifact, a failed install) is recorded
//! in the [`BuildSummary`](crate::orchestrator::BuildSummary) instead.

use crate::guard::GuardRejection;
use crate::orchestrator::RunState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("dispatch rejected: {0}")]
    DispatchRejected(GuardRejection),

    #[error("no tasks to dispatch")]
    NoTasks,

    #[error("tasks {first} and {second} share output paths")]
    PathCollision { first: String, second: String },

    #[error("no previous build run for '{source_id}'; dispatch it first")]
    NoPriorRun { source_id: String },

    #[error("the last build run was for '{last}', not '{requested}'")]
    SourceMismatch { requested: String, last: String },

    #[error("nothing to retry for '{source_id}': every task succeeded and was integrated")]
    NothingToRetry { source_id: String },

    #[error("a build run for '{source_id}' is {state}; wait for it to finish")]
    RunInProgress { source_id: String, state: RunState },
}

impl From<GuardRejection> for BuildError {
    fn from(rejection: GuardRejection) -> Self {
        BuildError::DispatchRejected(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{InvocationPolicy, RejectionReason};

    #[test]
    fn rejection_message_points_to_retry() {
        let err: BuildError = GuardRejection {
            tool: "dispatch_sections".into(),
            source_id: "example.com".into(),
            policy: InvocationPolicy::OncePerSource,
            reason: RejectionReason::AlreadyInvoked,
            last_success: None,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("dispatch rejected:"));
        assert!(msg.contains("retry_sections"));
    }

    #[test]
    fn mismatch_names_both_sources() {
        let err = BuildError::SourceMismatch {
            requested: "b.com".into(),
            last: "a.com".into(),
        };
        assert_eq!(err.to_string(), "the last build run was for 'a.com', not 'b.com'");
    }
}
