use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while persisting or removing the lock record.
#[derive(Debug, Error)]
pub enum LockError {
    /// The record could not be encoded.
    #[error("failed to serialise lock record: {source}")]
    Serialise {
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Writing the record failed.
    #[error("failed to write lock file '{path}': {source}")]
    Write {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing the record failed.
    #[error("failed to remove lock file '{path}': {source}")]
    Remove {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Creating the election claim failed for a reason other than contention.
    #[error("failed to create claim file '{path}': {source}")]
    Claim {
        /// Claim file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
