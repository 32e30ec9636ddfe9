//! Scheduler error types.

use thiserror::Error;

use mcs_placement::PlacementError;

use crate::infra::InfraError;

/// Errors that can occur while serving a scheduling request or a GC sweep.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every problem found in the request, in discovery order.
    #[error("invalid applications: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("another scheduling, migration or cleanup task is running")]
    Locked,

    /// Nothing of an accepted plan could be deployed.
    #[error("deployment failed: {}", .0.join("; "))]
    Deploy(Vec<String>),

    #[error("infrastructure error: {0}")]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("state store error: {0}")]
    State(#[from] mcs_state::StateError),
}

impl SchedulerError {
    /// Whether the chosen algorithm ended without a usable plan.
    pub fn is_unusable(&self) -> bool {
        matches!(self, SchedulerError::Placement(PlacementError::Unusable { .. }))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_joins_all_errors() {
        let err = SchedulerError::Validation(vec!["first".into(), "second".into()]);
        assert_eq!(err.to_string(), "invalid applications: first; second");
    }

    #[test]
    fn unusable_keeps_placement_text() {
        let err = SchedulerError::from(PlacementError::Unusable {
            algorithm: "CompRand".into(),
        });
        assert!(err.is_unusable());
        assert!(err.to_string().contains("unusable solution"));
        assert!(!SchedulerError::Locked.is_unusable());
    }
}
