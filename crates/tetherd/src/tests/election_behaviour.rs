//! Election against real sockets with the handshake probe.

use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;
use serde_json::json;

use tether_protocol::{Message, ShutdownReason};

use crate::bootstrap::{
    Bootstrap, BootstrapSettings, DaemonMode, DecisionCause, HandshakeProbe,
};
use crate::identity::ClientIdentity;
use crate::lock::{LockManager, LockRecord};
use crate::server::{EchoHandler, RequestHandler};
use crate::tests::support::{DaemonHarness, GateHandler, TestConfigLoader, WireClient, wait_until};

const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

fn election(lock_path: std::path::PathBuf) -> Bootstrap {
    Bootstrap::new(
        Arc::new(LockManager::new(lock_path)),
        BootstrapSettings {
            disable_daemon: false,
            health_check_timeout: PROBE_TIMEOUT,
        },
        Arc::new(HandshakeProbe::new(ClientIdentity::current())),
    )
}

#[test]
fn verified_daemon_makes_a_proxy() {
    let daemon = DaemonHarness::start();
    let decision = election(daemon.loader.lock_path()).determine_mode();
    assert_eq!(decision.mode, DaemonMode::Proxy);
    assert_eq!(decision.cause, DecisionCause::Healthy);
    assert_eq!(
        decision.existing_daemon.map(|record| record.instance_id),
        Some(daemon.record.instance_id.clone())
    );
}

#[test]
fn silent_socket_is_displaced_within_the_probe_timeout() {
    let loader = TestConfigLoader::new();
    let endpoint = loader.socket_endpoint();
    let path = endpoint.unix_path().expect("unix endpoint");
    let _silent = UnixListener::bind(path.as_std_path()).expect("bind silent socket");
    LockManager::new(loader.lock_path())
        .write_lock(&LockRecord::for_current_process(&endpoint, "hung-daemon", "0.1.0"))
        .expect("seed lock record");

    let started = Instant::now();
    let decision = election(loader.lock_path()).determine_mode();
    let elapsed = started.elapsed();

    assert_eq!(decision.mode, DaemonMode::Daemon);
    assert_eq!(decision.cause, DecisionCause::Unresponsive);
    assert!(decision.requires_takeover());
    assert!(
        elapsed < PROBE_TIMEOUT * 3,
        "probe took {elapsed:?}, bound is {PROBE_TIMEOUT:?}"
    );
}

#[test]
fn reused_pid_with_foreign_socket_owner_is_displaced() {
    let daemon = DaemonHarness::start();
    let mut impostor = daemon.record.clone();
    impostor.instance_id = String::from("some-earlier-daemon");
    LockManager::new(daemon.loader.lock_path())
        .write_lock(&impostor)
        .expect("overwrite lock record");

    let decision = election(daemon.loader.lock_path()).determine_mode();
    assert_eq!(decision.mode, DaemonMode::Daemon);
    assert_eq!(decision.cause, DecisionCause::InstanceMismatch);
    assert!(decision.requires_takeover());
}

#[test]
fn dead_pid_is_a_stale_lock() {
    let loader = TestConfigLoader::new();
    let mut record =
        LockRecord::for_current_process(&loader.socket_endpoint(), "gone", "0.1.0");
    record.pid = 99_999_999;
    LockManager::new(loader.lock_path())
        .write_lock(&record)
        .expect("seed lock record");

    let decision = election(loader.lock_path()).determine_mode();
    assert_eq!(decision.mode, DaemonMode::Daemon);
    assert!(decision.reason.contains("Stale"), "reason: {}", decision.reason);
    assert!(!decision.requires_takeover());
}

#[rstest]
#[case("5.0.0", DaemonMode::Standalone, DecisionCause::Rejected)]
#[case("0.1.0", DaemonMode::Proxy, DecisionCause::Healthy)]
fn admission_decides_between_proxy_and_standalone(
    #[case] min_client_version: &str,
    #[case] mode: DaemonMode,
    #[case] cause: DecisionCause,
) {
    let daemon = DaemonHarness::start_with(Arc::new(EchoHandler), min_client_version);
    let decision = election(daemon.loader.lock_path()).determine_mode();
    assert_eq!(decision.mode, mode);
    assert_eq!(decision.cause, cause);
}

#[test]
fn draining_daemon_is_awaited_rather_than_bypassed() {
    let gate = Arc::new(GateHandler::default());
    let daemon = DaemonHarness::start_with(Arc::clone(&gate) as Arc<dyn RequestHandler>, "0.1.0");
    let identity = ClientIdentity::current();
    let mut busy = WireClient::admitted(&daemon.endpoint(), &identity);
    busy.send(&Message::mcp_request("held", identity.client_id.clone(), json!({})));
    assert!(wait_until(|| daemon.coordinator.pending_count() == 1));

    let coordinator = Arc::clone(&daemon.coordinator);
    let drain = thread::spawn(move || coordinator.initiate_shutdown(ShutdownReason::Signal));
    assert!(wait_until(|| daemon.coordinator.is_shutting_down()));

    let decision = election(daemon.loader.lock_path()).determine_mode();
    assert_eq!(decision.mode, DaemonMode::Proxy);
    assert_eq!(decision.cause, DecisionCause::Draining);
    assert!(!decision.requires_takeover());
    assert_eq!(
        decision.existing_daemon.map(|record| record.instance_id),
        Some(daemon.record.instance_id.clone())
    );

    gate.release();
    assert_eq!(busy.recv_kind("mcp_response")["requestId"], "held");
    drain.join().expect("drain thread").expect("shutdown completes");
}
