//! Defines the unified error surface for process launch and supervision.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use ortho_config::OrthoError;

use tether_config::{RuntimePathsError, SocketPreparationError};
use tether_protocol::VersionParseError;

use crate::bootstrap::BootstrapError;
use crate::lock::LockError;
use crate::proxy::ProxyError;
use crate::stdio::StdioError;
use crate::telemetry::TelemetryError;
use crate::transport::ListenerError;

use super::signals::SignalError;

/// Errors surfaced while launching or running any of the three roles.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Preparing the socket filesystem failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Underlying filesystem error.
        #[source]
        source: SocketPreparationError,
    },
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The socket path lacked a parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingSocketParent {
        /// Configured socket path.
        path: String,
    },
    /// Writing or removing the lock record failed.
    #[error("lock record failure: {source}")]
    Lock {
        /// Underlying lock error.
        #[source]
        source: LockError,
    },
    /// Election could not complete.
    #[error("election failed: {source}")]
    Bootstrap {
        /// Underlying election error.
        #[source]
        source: BootstrapError,
    },
    /// Every election attempt ended without a role.
    #[error("cannot start: lock contention after {attempts} attempts")]
    LockContention {
        /// Elections tried.
        attempts: u32,
    },
    /// Socket listener startup failed.
    #[error("daemon socket listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// A configured or announced version could not be parsed.
    #[error("invalid version: {source}")]
    Version {
        /// Underlying parse error.
        #[source]
        source: VersionParseError,
    },
    /// Installing signal handlers failed.
    #[error("failed to install shutdown signals: {source}")]
    Signal {
        /// Underlying signal error.
        #[source]
        source: SignalError,
    },
    /// Spawning a background thread failed.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread role.
        name: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The proxy session failed.
    #[error("proxy session failed: {source}")]
    Proxy {
        /// Underlying proxy error.
        #[source]
        source: ProxyError,
    },
    /// Standard input or output failed in standalone mode.
    #[error("standalone session failed: {source}")]
    Stdio {
        /// Underlying stream error.
        #[source]
        source: StdioError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<SocketPreparationError> for LaunchError {
    fn from(source: SocketPreparationError) -> Self {
        Self::Socket { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::MissingSocketParent { path } => Self::MissingSocketParent { path },
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<LockError> for LaunchError {
    fn from(source: LockError) -> Self {
        Self::Lock { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

impl From<VersionParseError> for LaunchError {
    fn from(source: VersionParseError) -> Self {
        Self::Version { source }
    }
}

impl From<SignalError> for LaunchError {
    fn from(source: SignalError) -> Self {
        Self::Signal { source }
    }
}

impl From<ProxyError> for LaunchError {
    fn from(source: ProxyError) -> Self {
        Self::Proxy { source }
    }
}

impl From<StdioError> for LaunchError {
    fn from(source: StdioError) -> Self {
        Self::Stdio { source }
    }
}
