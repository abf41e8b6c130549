//! Layered configuration shared by `tetherd` and its clients.
//!
//! Values resolve from built-in defaults, then configuration files, then
//! `TETHER_*` environment variables, then command-line flags. The daemon and
//! proxy processes must resolve the same socket and runtime directory,
//! otherwise election would happen against two different lock records.

mod defaults;
mod logging;
mod runtime;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CIRCUIT_COOLDOWN_MS, DEFAULT_HEALTH_CHECK_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MIN_CLIENT_VERSION,
    DEFAULT_SHUTDOWN_CHECK_INTERVAL_MS, DEFAULT_SHUTDOWN_MAX_WAIT_MS, DEFAULT_TCP_PORT,
    DEFAULT_TIMEOUT_CHECK_INTERVAL_MS, LOCK_FILE_NAME, MIN_SHUTDOWN_CHECK_INTERVAL_MS,
    RUNTIME_NAMESPACE, SOCKET_FILE_NAME, default_log_filter, default_log_filter_string,
    default_log_format, default_min_client_version, default_runtime_directory,
    default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved settings for the daemon lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Socket the daemon listens on and clients dial.
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter directives.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Diagnostic output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Forces standalone mode, skipping election entirely.
    #[ortho_config(default = false)]
    pub disable_daemon: bool,
    /// Bound on the liveness probe's connect and handshake reply.
    #[ortho_config(default = DEFAULT_HEALTH_CHECK_TIMEOUT_MS)]
    pub health_check_timeout_ms: u64,
    /// Bound on the graceful drain.
    #[ortho_config(default = DEFAULT_SHUTDOWN_MAX_WAIT_MS)]
    pub shutdown_max_wait_ms: u64,
    /// Drain poll interval.
    #[ortho_config(default = DEFAULT_SHUTDOWN_CHECK_INTERVAL_MS)]
    pub shutdown_check_interval_ms: u64,
    /// Period of the supervised timeout check.
    #[ortho_config(default = DEFAULT_TIMEOUT_CHECK_INTERVAL_MS)]
    pub timeout_check_interval_ms: u64,
    /// Failures in a row that open the circuit.
    #[ortho_config(default = DEFAULT_MAX_CONSECUTIVE_ERRORS)]
    pub max_consecutive_errors: u32,
    /// Cooldown before an open circuit admits a trial call.
    #[ortho_config(default = DEFAULT_CIRCUIT_COOLDOWN_MS)]
    pub circuit_cooldown_ms: u64,
    /// Period between proxy heartbeats.
    #[ortho_config(default = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
    /// Oldest client release the daemon admits.
    #[ortho_config(default = default_min_client_version())]
    pub min_client_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            disable_daemon: false,
            health_check_timeout_ms: DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            shutdown_max_wait_ms: DEFAULT_SHUTDOWN_MAX_WAIT_MS,
            shutdown_check_interval_ms: DEFAULT_SHUTDOWN_CHECK_INTERVAL_MS,
            timeout_check_interval_ms: DEFAULT_TIMEOUT_CHECK_INTERVAL_MS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            circuit_cooldown_ms: DEFAULT_CIRCUIT_COOLDOWN_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            min_client_version: default_min_client_version(),
        }
    }
}

impl Config {
    /// Socket the daemon listens on.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// `tracing` filter directives.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Diagnostic output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether election is skipped in favour of standalone mode.
    #[must_use]
    pub fn daemon_disabled(&self) -> bool {
        self.disable_daemon
    }

    /// Bound on the liveness probe.
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Bound on the graceful drain.
    #[must_use]
    pub fn shutdown_max_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_max_wait_ms)
    }

    /// Drain poll interval, never below
    /// [`MIN_SHUTDOWN_CHECK_INTERVAL_MS`].
    #[must_use]
    pub fn shutdown_check_interval(&self) -> Duration {
        Duration::from_millis(
            self.shutdown_check_interval_ms
                .max(MIN_SHUTDOWN_CHECK_INTERVAL_MS),
        )
    }

    /// Period of the supervised timeout check.
    #[must_use]
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    /// Failures in a row that open the circuit, never zero.
    #[must_use]
    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors.max(1)
    }

    /// Cooldown before an open circuit admits a trial call.
    #[must_use]
    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    /// Period between proxy heartbeats.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Oldest client release the daemon admits.
    #[must_use]
    pub fn min_client_version(&self) -> &str {
        &self.min_client_version
    }
}
