//! Tracker error type.

use thiserror::Error;

use crate::ports::StoreError;

/// Errors returned by tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A referenced timer or session does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Saving or loading through a collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The shared tracker lock was poisoned by a panicking holder.
    #[error("tracker lock poisoned")]
    LockPoisoned,
}

impl TrackerError {
    pub(crate) fn timer_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "timer",
            id: id.to_string(),
        }
    }

    pub(crate) fn subtimer_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "session",
            id: id.to_string(),
        }
    }
}
