//! Error types for the placement core.

use thiserror::Error;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that escape the scheduling core.
///
/// Ordinary over-commit is not an error: the refiner reports it as an
/// infeasible candidate and the search moves on.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The algorithm ended without a feasible plan.
    #[error("{algorithm} got an unusable solution")]
    Unusable { algorithm: String },

    /// Internal bookkeeping diverged. Never caused by user input.
    #[error("placement invariant violated: {0}")]
    Invariant(String),

    #[error("unknown scheduling algorithm: {0}")]
    UnknownAlgorithm(String),
}

impl PlacementError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        PlacementError::Invariant(msg.into())
    }
}
