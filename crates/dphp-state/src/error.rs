use std::time::Duration;

use dphp_store::StoreError;
use dphp_types::TypesError;
use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {subject}")]
    Timeout { subject: String, waited: Duration },

    #[error("lock acquisition cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StateError {
    /// Another writer committed since this checkout was taken.
    #[error("concurrency conflict on {subject}: {reason}")]
    ConcurrencyConflict { subject: String, reason: String },

    #[error("{kind} state is not kept in a key-value bucket")]
    NotWatchable { kind: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::ConcurrencyConflict { .. })
    }
}
