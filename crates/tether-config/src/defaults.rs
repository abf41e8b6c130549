use std::env;

use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Directory name created beneath the platform runtime directory.
pub const RUNTIME_NAMESPACE: &str = "tether";

/// File name of the daemon socket inside the runtime directory.
pub const SOCKET_FILE_NAME: &str = "tetherd.sock";

/// File name of the daemon lock record inside the runtime directory.
pub const LOCK_FILE_NAME: &str = "tetherd.lock";

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How long a liveness probe waits for the daemon's handshake reply.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 2_000;

/// Upper bound on the graceful drain before in-flight requests are dropped.
pub const DEFAULT_SHUTDOWN_MAX_WAIT_MS: u64 = 30_000;

/// Poll interval while draining.
pub const DEFAULT_SHUTDOWN_CHECK_INTERVAL_MS: u64 = 100;

/// Floor applied to the drain poll interval.
pub const MIN_SHUTDOWN_CHECK_INTERVAL_MS: u64 = 10;

/// Period of the supervised timeout check.
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL_MS: u64 = 30_000;

/// Failures in a row that open the circuit.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Time an open circuit waits before allowing a trial call.
pub const DEFAULT_CIRCUIT_COOLDOWN_MS: u64 = 60_000;

/// Period between client heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Oldest client release the daemon admits.
pub const DEFAULT_MIN_CLIENT_VERSION: &str = "0.1.0";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned minimum client version.
#[must_use]
pub fn default_min_client_version() -> String {
    DEFAULT_MIN_CLIENT_VERSION.to_owned()
}

/// Computes the default socket endpoint for the daemon.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::unix(default_runtime_directory().join(SOCKET_FILE_NAME))
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

/// Runtime directory used when the socket path does not imply one.
///
/// Prefers `$XDG_RUNTIME_DIR/tether`; otherwise falls back to a per-user
/// directory beneath the system temporary directory.
#[must_use]
pub fn default_runtime_directory() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };
    base.push(RUNTIME_NAMESPACE);
    if apply_namespace && let Some(namespace) = user_namespace() {
        base.push(namespace);
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> Option<String> {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    Some(format!("uid-{uid}"))
}

#[cfg(not(unix))]
fn user_namespace() -> Option<String> {
    None
}
