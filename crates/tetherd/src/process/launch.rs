//! Supervises role election and the lifetime of the elected role.

use std::io::{self, BufRead, StdinLock, Stdout, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_config::{Config, RuntimePaths};
use tether_protocol::{ShutdownReason, Version};

use crate::bootstrap::{
    Bootstrap, BootstrapSettings, DaemonMode, DecisionCause, HandshakeProbe, ModeDecision,
};
use crate::breaker::{BreakerSettings, TimeoutChecker};
use crate::clock::SystemClock;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::identity::ClientIdentity;
use crate::lock::{LockManager, LockRecord};
use crate::proxy::{ProxyClient, ProxyError, UpgradeOutcome, run_stdio};
use crate::server::{
    ClientRegistry, DaemonIdentity, DaemonServer, DaemonSupervisor, EchoHandler, RequestHandler,
};
use crate::shutdown::{ClientNotifier, ShutdownCoordinator, ShutdownReport, ShutdownSettings};
use crate::telemetry;
use crate::transport::{ListenerHandle, SocketListener};

use super::config::{ConfigLoader, SystemConfigLoader};
use super::errors::LaunchError;
use super::signals::{ShutdownSignal, SystemShutdownSignal};
use super::standalone::run_standalone;
use super::{MAX_ELECTION_ATTEMPTS, PROCESS_TARGET};

/// Clients silent for this many heartbeat intervals are dropped.
const IDLE_HEARTBEATS: u32 = 3;
/// Poll period while waiting for an upgraded daemon to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Poll period while waiting for a contender to publish its lock record.
const CONTENTION_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound of the random delay taken after losing a race.
const CONTENTION_JITTER_MS: u128 = 25;
/// Lost races that published a winner are not charged against the election
/// budget, up to this many.
const MAX_UNCHARGED_RACES: u32 = 32;

/// How the process's role ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// This process served as the daemon until shutdown.
    Daemon(ShutdownReport),
    /// This process forwarded requests to another daemon.
    Proxy {
        /// Requests answered.
        requests: u64,
    },
    /// This process served requests itself.
    Standalone {
        /// Requests answered.
        requests: u64,
    },
}

/// Process-level collaborators.
pub struct ProcessControl {
    /// Stops the daemon role.
    pub signals: Arc<dyn ShutdownSignal>,
    /// Identity used for probes and proxy connections.
    pub identity: ClientIdentity,
}

/// Service dependencies shared by all roles.
pub struct ServiceDeps<L> {
    /// Resolves the configuration.
    pub loader: L,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn HealthReporter>,
    /// Business logic for daemon and standalone roles.
    pub handler: Arc<dyn RequestHandler>,
}

/// Request stream consumed by the proxy and standalone roles.
pub struct StdioStreams<R, W> {
    /// One JSON request per line.
    pub input: R,
    /// One JSON response per line.
    pub output: W,
}

/// Collaborators required to launch the process.
pub struct LaunchPlan<L, R, W> {
    /// Signals and identity.
    pub process: ProcessControl,
    /// Configuration, reporting and request handling.
    pub services: ServiceDeps<L>,
    /// Request and response streams.
    pub streams: StdioStreams<R, W>,
}

/// Runs the process with production collaborators: layered configuration,
/// termination signals, the echo handler and the standard streams.
///
/// # Errors
///
/// Returns [`LaunchError`] when the process cannot start or its role fails.
pub fn run() -> Result<LaunchOutcome, LaunchError> {
    let plan: LaunchPlan<SystemConfigLoader, StdinLock<'static>, Stdout> = LaunchPlan {
        process: ProcessControl {
            signals: Arc::new(SystemShutdownSignal::new()),
            identity: ClientIdentity::current(),
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            handler: Arc::new(EchoHandler),
        },
        streams: StdioStreams {
            input: io::stdin().lock(),
            output: io::stdout(),
        },
    };
    run_with(plan)
}

/// Runs the process with injected collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when the process cannot start or its role fails.
/// Failures after configuration has loaded are also passed to the health
/// reporter.
pub fn run_with<L, R, W>(plan: LaunchPlan<L, R, W>) -> Result<LaunchOutcome, LaunchError>
where
    L: ConfigLoader,
    R: BufRead,
    W: Write,
{
    let LaunchPlan {
        process,
        services,
        streams,
    } = plan;
    let config = services.loader.load()?;
    let telemetry = telemetry::initialise(&config)?;
    debug!(
        target: PROCESS_TARGET,
        log_format = %telemetry.active().format(),
        log_filter = telemetry.active().filter(),
        "configuration loaded"
    );
    let reporter = Arc::clone(&services.reporter);
    let result = Launcher::prepare(config, process, services).and_then(|launcher| {
        let StdioStreams { mut input, mut output } = streams;
        launcher.elect_and_serve(&mut input, &mut output)
    });
    if let Err(error) = &result {
        reporter.launch_failed(error);
    }
    result
}

struct Launcher {
    config: Config,
    process: ProcessControl,
    reporter: Arc<dyn HealthReporter>,
    handler: Arc<dyn RequestHandler>,
    lock: Arc<LockManager>,
    bootstrap: Bootstrap,
}

enum DaemonStep {
    Stopped(ShutdownReport),
    /// Another contender holds the socket or the claim.
    Contended,
}

enum ProxyStep {
    Finished(u64),
    DaemonLost,
    Reelect,
}

impl Launcher {
    fn prepare<L>(
        config: Config,
        process: ProcessControl,
        services: ServiceDeps<L>,
    ) -> Result<Self, LaunchError> {
        config.daemon_socket().prepare_filesystem()?;
        let paths = RuntimePaths::from_config(&config)?;
        let lock = Arc::new(LockManager::new(paths.lock_path()));
        let probe = Arc::new(HandshakeProbe::new(process.identity.clone()));
        let bootstrap = Bootstrap::new(
            Arc::clone(&lock),
            BootstrapSettings::from(&config),
            probe,
        );
        info!(
            target: PROCESS_TARGET,
            socket = %config.daemon_socket(),
            lock = %paths.lock_path().display(),
            version = %process.identity.version,
            "starting"
        );
        Ok(Self {
            config,
            process,
            reporter: services.reporter,
            handler: services.handler,
            lock,
            bootstrap,
        })
    }

    fn elect_and_serve<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<LaunchOutcome, LaunchError>
    where
        R: BufRead,
        W: Write,
    {
        let mut attempt = 0;
        let mut uncharged = 0;
        let mut upgrade_requested = false;
        loop {
            attempt += 1;
            if attempt > MAX_ELECTION_ATTEMPTS {
                return Err(LaunchError::LockContention {
                    attempts: MAX_ELECTION_ATTEMPTS,
                });
            }
            let decision = self.bootstrap.determine_mode();
            self.reporter.election_decided(attempt, &decision);
            match decision.mode {
                DaemonMode::Daemon => match self.serve_as_daemon(attempt, &decision)? {
                    DaemonStep::Stopped(report) => return Ok(LaunchOutcome::Daemon(report)),
                    DaemonStep::Contended => {
                        if self.await_winner() && uncharged < MAX_UNCHARGED_RACES {
                            uncharged += 1;
                            attempt -= 1;
                        }
                    }
                },
                DaemonMode::Proxy if decision.cause == DecisionCause::Draining => {
                    if let Some(existing) = decision.existing_daemon.as_ref() {
                        let grace = self.config.shutdown_max_wait()
                            + self.config.shutdown_check_interval()
                            + self.config.health_check_timeout();
                        self.wait_for_handover(existing, grace);
                    }
                }
                DaemonMode::Proxy => {
                    match self.serve_as_proxy(&decision, &mut upgrade_requested, input, output)? {
                        ProxyStep::Finished(requests) => {
                            return Ok(LaunchOutcome::Proxy { requests });
                        }
                        ProxyStep::DaemonLost => attempt = 0,
                        ProxyStep::Reelect => thread::sleep(contention_jitter()),
                    }
                }
                DaemonMode::Standalone => {
                    let requests = run_standalone(
                        self.handler.as_ref(),
                        &self.process.identity.client_id,
                        &mut *input,
                        &mut *output,
                    )?;
                    return Ok(LaunchOutcome::Standalone { requests });
                }
            }
        }
    }

    fn serve_as_daemon(
        &self,
        attempt: u32,
        decision: &ModeDecision,
    ) -> Result<DaemonStep, LaunchError> {
        let endpoint = self.config.daemon_socket();
        let bound = if decision.requires_takeover() {
            SocketListener::bind_replacing(endpoint)
        } else {
            SocketListener::bind(endpoint)
        };
        let listener = match bound {
            Ok(listener) => listener,
            Err(error) if error.is_address_in_use() => {
                warn!(
                    target: PROCESS_TARGET,
                    endpoint = %endpoint,
                    error = %error,
                    "socket taken by another contender"
                );
                self.reporter.election_lost(attempt);
                return Ok(DaemonStep::Contended);
            }
            Err(error) => return Err(error.into()),
        };

        let identity = DaemonIdentity {
            instance_id: Uuid::new_v4().to_string(),
            version: self.process.identity.version.clone(),
            min_client_version: self.config.min_client_version().to_owned(),
        };
        let registry = Arc::new(ClientRegistry::new());
        let coordinator = Arc::new(
            ShutdownCoordinator::new(
                ShutdownSettings::from(&self.config),
                Arc::clone(&registry) as Arc<dyn ClientNotifier>,
            )
            .with_reporter(Arc::clone(&self.reporter)),
        );
        let mut record = LockRecord::for_current_process(
            &listener.local_endpoint(),
            identity.instance_id.clone(),
            identity.min_client_version.clone(),
        );
        record.version.clone_from(&identity.version);
        let server = Arc::new(DaemonServer::new(
            identity,
            Arc::clone(&registry),
            Arc::clone(&coordinator),
            Arc::clone(&self.handler),
            Arc::clone(&self.lock),
        )?);
        let listener = listener.start(server)?;

        match self.bootstrap.acquire_daemon_lock(&record) {
            Ok(true) => {}
            Ok(false) => {
                self.reporter.election_lost(attempt);
                stop_listener(listener)?;
                return Ok(DaemonStep::Contended);
            }
            Err(error) => {
                stop_listener(listener)?;
                return Err(error.into());
            }
        }
        self.reporter.lock_acquired(&record);

        let supervised = self.supervise(&registry, &coordinator);
        stop_listener(listener)?;
        registry.close_all();
        self.lock.close()?;
        let report = supervised?;
        info!(
            target: PROCESS_TARGET,
            reason = %report.reason,
            forced = report.forced,
            "daemon stopped"
        );
        Ok(DaemonStep::Stopped(report))
    }

    /// Runs the timeout checker and the signal watcher until the coordinator
    /// finishes a shutdown.
    fn supervise(
        &self,
        registry: &Arc<ClientRegistry>,
        coordinator: &Arc<ShutdownCoordinator>,
    ) -> Result<ShutdownReport, LaunchError> {
        let max_idle = self.config.heartbeat_interval() * IDLE_HEARTBEATS;
        let checker = TimeoutChecker::new(
            Arc::new(DaemonSupervisor::new(
                Arc::clone(&self.lock),
                Arc::clone(registry),
                Arc::clone(coordinator),
                max_idle,
            )),
            self.config.timeout_check_interval(),
            BreakerSettings::from(&self.config),
            Arc::new(SystemClock),
        )
        .with_reporter(Arc::clone(&self.reporter));
        checker.start().map_err(|source| LaunchError::Spawn {
            name: "timeout checker",
            source,
        })?;

        let signals = Arc::clone(&self.process.signals);
        signals.arm()?;
        let watcher = {
            let signals = Arc::clone(&signals);
            let coordinator = Arc::clone(coordinator);
            thread::Builder::new()
                .name(String::from("tetherd-signals"))
                .spawn(move || {
                    if signals.wait().is_some()
                        && let Err(error) = coordinator.initiate_shutdown(ShutdownReason::Signal)
                    {
                        debug!(target: PROCESS_TARGET, error = %error, "signal ignored");
                    }
                })
                .map_err(|source| LaunchError::Spawn {
                    name: "signal watcher",
                    source,
                })?
        };

        let report = coordinator.wait_for_completion();
        signals.close();
        if watcher.join().is_err() {
            warn!(target: PROCESS_TARGET, "signal watcher panicked");
        }
        checker.stop();
        Ok(report)
    }

    fn serve_as_proxy<R, W>(
        &self,
        decision: &ModeDecision,
        upgrade_requested: &mut bool,
        input: &mut R,
        output: &mut W,
    ) -> Result<ProxyStep, LaunchError>
    where
        R: BufRead,
        W: Write,
    {
        let Some(existing) = decision.existing_daemon.as_ref() else {
            return Ok(ProxyStep::Reelect);
        };
        let endpoint = match existing.endpoint() {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!(target: PROCESS_TARGET, error = %error, "daemon endpoint unreadable");
                return Ok(ProxyStep::Reelect);
            }
        };
        let client = match ProxyClient::connect(
            &endpoint,
            self.process.identity.renewed(),
            self.config.health_check_timeout(),
        ) {
            Ok(client) => client,
            Err(error) => {
                warn!(target: PROCESS_TARGET, error = %error, "could not reach daemon");
                return Ok(ProxyStep::Reelect);
            }
        };

        if !*upgrade_requested && self.is_newer_than(&client.ack().daemon_version)? {
            *upgrade_requested = true;
            match client.request_upgrade(&self.process.identity.version)? {
                UpgradeOutcome::Pending { shutdown_in_ms } => {
                    disconnect(client);
                    let deadline = Duration::from_millis(shutdown_in_ms)
                        + self.config.health_check_timeout();
                    self.wait_for_handover(existing, deadline);
                    return Ok(ProxyStep::Reelect);
                }
                UpgradeOutcome::Aborted { reason } => {
                    info!(target: PROCESS_TARGET, reason = %reason, "daemon declined upgrade");
                }
            }
        }

        let heartbeats = client
            .spawn_heartbeats(self.config.heartbeat_interval())
            .map_err(|source| LaunchError::Spawn {
                name: "heartbeat",
                source,
            })?;
        let result = run_stdio(&client, &mut *input, &mut *output);
        heartbeats.stop();
        match result {
            Ok(requests) => {
                disconnect(client);
                Ok(ProxyStep::Finished(requests))
            }
            Err(ProxyError::ShuttingDown { reason }) => {
                info!(target: PROCESS_TARGET, reason = %reason, "daemon stopping; re-electing");
                Ok(ProxyStep::DaemonLost)
            }
            Err(ProxyError::Disconnected) => {
                info!(target: PROCESS_TARGET, "daemon connection lost; re-electing");
                Ok(ProxyStep::DaemonLost)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Waits for the contender that beat us to publish a live lock record.
    /// Returns `false` when none appeared within the health-check timeout.
    fn await_winner(&self) -> bool {
        thread::sleep(contention_jitter());
        let deadline = Instant::now() + self.config.health_check_timeout();
        loop {
            if self
                .lock
                .read_lock()
                .is_some_and(|record| LockManager::is_process_alive(record.pid))
            {
                return true;
            }
            if Instant::now() >= deadline {
                debug!(target: PROCESS_TARGET, "no lock record appeared after losing the race");
                return false;
            }
            thread::sleep(CONTENTION_POLL_INTERVAL);
        }
    }

    /// Waits until `previous` has exited or no longer owns the lock record.
    fn wait_for_handover(&self, previous: &LockRecord, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let still_owner = || {
            LockManager::is_process_alive(previous.pid)
                && self
                    .lock
                    .read_lock()
                    .is_some_and(|record| record.instance_id == previous.instance_id)
        };
        while still_owner() {
            if Instant::now() >= deadline {
                warn!(
                    target: PROCESS_TARGET,
                    pid = previous.pid,
                    "daemon still running after its grace period"
                );
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        info!(target: PROCESS_TARGET, pid = previous.pid, "previous daemon released the lock");
    }

    fn is_newer_than(&self, daemon_version: &str) -> Result<bool, LaunchError> {
        let ours: Version = self.process.identity.version.parse()?;
        Ok(daemon_version
            .parse::<Version>()
            .is_ok_and(|theirs| ours > theirs))
    }
}

fn stop_listener(listener: ListenerHandle) -> Result<(), LaunchError> {
    listener.shutdown();
    listener.join().map_err(LaunchError::from)
}

fn disconnect(client: ProxyClient) {
    if let Err(error) = client.disconnect(None) {
        debug!(target: PROCESS_TARGET, error = %error, "disconnect not delivered");
    }
}

/// Random pause that keeps simultaneous losers from re-electing in lockstep.
fn contention_jitter() -> Duration {
    let millis = Uuid::new_v4().as_u128() % CONTENTION_JITTER_MS;
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
