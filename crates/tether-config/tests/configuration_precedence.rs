//! Layer precedence: defaults < file < environment < command line.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use tether_config::{Config, SocketEndpoint, default_log_filter, default_socket_endpoint};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialises environment mutation and restores the previous values on drop.
struct EnvGuard {
    previous: Vec<(&'static str, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn acquire() -> Self {
        let lock = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self {
            previous: Vec::new(),
            _lock: lock,
        }
    }

    fn set(&mut self, key: &'static str, value: impl AsRef<OsStr>) {
        self.previous.push((key, std::env::var_os(key)));
        // Edition 2024 marks environment mutation unsafe; the mutex keeps
        // these tests from racing one another.
        unsafe { std::env::set_var(key, value) };
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        while let Some((key, value)) = self.previous.pop() {
            match value {
                Some(previous) => unsafe { std::env::set_var(key, previous) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("tether.toml");
        fs::write(&path, contents).expect("write configuration file");
        path
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: TempDir::new().expect("create temporary directory"),
    }
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    std::iter::once(OsString::from("tetherd"))
        .chain(extra.iter().map(|arg| arg.to_os_string()))
        .collect()
}

#[rstest]
fn defaults_apply_without_overrides() {
    let _env = EnvGuard::acquire();
    let config = Config::load_from_iter(args(&[])).expect("defaults load");
    assert_eq!(config.daemon_socket(), &default_socket_endpoint());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.health_check_timeout_ms, 2_000);
    assert_eq!(config.max_consecutive_errors, 5);
}

#[rstest]
fn file_overrides_defaults(workspace: Workspace) {
    let _env = EnvGuard::acquire();
    let path = workspace.write_config(concat!(
        "daemon_socket = { transport = \"tcp\", host = \"127.0.0.1\", port = 9900 }\n",
        "shutdown_max_wait_ms = 5000\n",
    ));
    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]))
    .expect("file configuration loads");
    assert_eq!(config.daemon_socket(), &SocketEndpoint::tcp("127.0.0.1", 9900));
    assert_eq!(config.shutdown_max_wait_ms, 5_000);
}

#[rstest]
fn environment_overrides_file(workspace: Workspace) {
    let mut env = EnvGuard::acquire();
    let path = workspace.write_config("health_check_timeout_ms = 750\n");
    env.set("TETHER_HEALTH_CHECK_TIMEOUT_MS", "1250");
    env.set("TETHER_DISABLE_DAEMON", "true");
    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]))
    .expect("layered configuration loads");
    assert_eq!(config.health_check_timeout_ms, 1_250);
    assert!(config.daemon_disabled());
}

#[rstest]
fn command_line_overrides_file(workspace: Workspace) {
    let _env = EnvGuard::acquire();
    let path = workspace.write_config(
        "daemon_socket = { transport = \"tcp\", host = \"127.0.0.1\", port = 9900 }\n",
    );
    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
        OsStr::new("--daemon-socket"),
        OsStr::new("tcp://127.0.0.1:9901"),
    ]))
    .expect("cli override loads");
    assert_eq!(config.daemon_socket(), &SocketEndpoint::tcp("127.0.0.1", 9901));
}

#[rstest]
fn malformed_file_fails_loading(workspace: Workspace) {
    let _env = EnvGuard::acquire();
    let path = workspace.write_config("daemon_socket = { transport = \"tcp\" host = }\n");
    let result = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]));
    assert!(result.is_err(), "malformed configuration must not load");
}
