//! Test configuration loaders for scenarios covering success and failure
//! paths.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use tether_config::{Config, SocketEndpoint};

use crate::process::ConfigLoader;

/// Loader that places the socket and lock record under a temporary
/// directory, with timings short enough for tests.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
    disable_daemon: bool,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            dir: Arc::new(dir),
            disable_daemon: false,
        }
    }

    /// Same directory with election switched off.
    #[must_use]
    pub fn disabled(&self) -> Self {
        Self {
            dir: Arc::clone(&self.dir),
            disable_daemon: true,
        }
    }

    pub fn socket_endpoint(&self) -> SocketEndpoint {
        let path = self.dir.path().join("tetherd.sock");
        SocketEndpoint::unix(
            path.to_str()
                .expect("temporary socket path was not valid UTF-8")
                .to_owned(),
        )
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("tetherd.lock")
    }

    pub fn config(&self) -> Config {
        Config {
            daemon_socket: self.socket_endpoint(),
            disable_daemon: self.disable_daemon,
            health_check_timeout_ms: 500,
            shutdown_max_wait_ms: 2_000,
            shutdown_check_interval_ms: 10,
            timeout_check_interval_ms: 100,
            ..Config::default()
        }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config())
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("tetherd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
