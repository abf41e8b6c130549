//! Derives the runtime directory shared by the daemon and its clients.
//!
//! Every process must agree on where the lock record lives, otherwise two
//! daemons could be elected. The directory is the socket's parent for Unix
//! endpoints and the platform runtime directory for TCP.

use std::fs::{self, DirBuilder};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults::{LOCK_FILE_NAME, default_runtime_directory};
use crate::{Config, SocketEndpoint};

/// Canonical paths for runtime artefacts written by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the shared configuration and creates the
    /// runtime directory with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Fails when a Unix socket path has no parent or the directory cannot
    /// be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = runtime_directory(config.daemon_socket())?;
        create_private_dir(&runtime_dir)?;
        Ok(Self {
            lock_path: runtime_dir.join(LOCK_FILE_NAME),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the daemon lock record.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }
}

fn runtime_directory(socket: &SocketEndpoint) -> Result<PathBuf, RuntimePathsError> {
    match socket {
        SocketEndpoint::Unix { path } => path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .map(|parent| parent.as_std_path().to_path_buf())
            .ok_or_else(|| RuntimePathsError::MissingSocketParent {
                path: path.to_string(),
            }),
        SocketEndpoint::Tcp { .. } => Ok(default_runtime_directory().into_std_path_buf()),
    }
}

fn create_private_dir(path: &Path) -> Result<(), RuntimePathsError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .or_else(|source| {
            if fs::metadata(path).is_ok_and(|meta| meta.is_dir()) {
                Ok(())
            } else {
                Err(source)
            }
        })
        .map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: path.to_path_buf(),
            source,
        })
}

/// Errors raised while deriving daemon runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The socket path lacked a parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingSocketParent {
        /// Offending socket path.
        path: String,
    },
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}
