use thiserror::Error;

use crate::lock::LockError;

/// Hard failures during election.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The lock record or claim file could not be written.
    #[error("failed to write daemon lock: {source}")]
    Lock {
        /// Underlying lock error.
        #[source]
        source: LockError,
    },
}

impl From<LockError> for BootstrapError {
    fn from(source: LockError) -> Self {
        Self::Lock { source }
    }
}
