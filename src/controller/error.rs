use thiserror::Error;

use crate::error::SpannedErr;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("group {0} has no resource version")]
    MissingMetadata(String),
}

/// How the controller treats a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The group moved on under the pass. Start over right away.
    Conflict,
    /// Retry with backoff.
    Transient,
    /// An object the pass needed is gone. Watch events cover the rest.
    Gone,
    /// Retrying cannot help.
    Permanent,
}

impl ReconcileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::Store(StoreError::Conflict) => ErrorClass::Conflict,
            ReconcileError::Store(StoreError::NotFound) => ErrorClass::Gone,
            ReconcileError::Store(StoreError::Invalid(_)) => ErrorClass::Permanent,
            ReconcileError::Store(StoreError::AlreadyExists | StoreError::Unavailable(_)) => {
                ErrorClass::Transient
            }
            ReconcileError::MissingMetadata(_) => ErrorClass::Permanent,
        }
    }
}

impl From<StoreError> for SpannedErr<ReconcileError> {
    fn from(err: StoreError) -> Self {
        SpannedErr::capture(ReconcileError::Store(err))
    }
}
