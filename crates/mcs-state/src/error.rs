//! Errors of the scheduler state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures while keeping RTT rows, run records and auto-VM records.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open scheduler state: {0}")]
    Open(String),

    /// redb refused a transaction, a table or a row access.
    #[error("state storage failure on {table}: {message}")]
    Storage { table: String, message: String },

    #[error("cannot encode {table} record {key:?}: {message}")]
    Encode {
        table: String,
        key: String,
        message: String,
    },

    /// A stored row no longer decodes into its record type.
    #[error("corrupt {table} record {key:?}: {message}")]
    Corrupt {
        table: String,
        key: String,
        message: String,
    },

    #[error("refusing {table} record: {reason}")]
    InvalidRecord { table: String, reason: String },
}

impl StateError {
    pub(crate) fn storage(table: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            table: table.to_string(),
            message: err.to_string(),
        }
    }
}
