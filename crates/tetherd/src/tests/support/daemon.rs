//! In-process daemon serving a temporary socket.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use tether_config::SocketEndpoint;

use crate::lock::{LockManager, LockRecord};
use crate::server::{ClientRegistry, DaemonIdentity, DaemonServer, EchoHandler, RequestHandler};
use crate::shutdown::{ClientNotifier, ShutdownCoordinator, ShutdownSettings};
use crate::transport::{ListenerHandle, SocketListener};

use super::TestConfigLoader;

pub const DAEMON_VERSION: &str = "1.0.0";

/// Daemon server, registry and lock record wired together the way the
/// daemon role wires them, without election or signals.
pub struct DaemonHarness {
    pub loader: TestConfigLoader,
    pub lock: Arc<LockManager>,
    pub registry: Arc<ClientRegistry>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub record: LockRecord,
    listener: Option<ListenerHandle>,
}

impl DaemonHarness {
    pub fn start() -> Self {
        Self::start_with(Arc::new(EchoHandler), "0.1.0")
    }

    pub fn start_with(handler: Arc<dyn RequestHandler>, min_client_version: &str) -> Self {
        let loader = TestConfigLoader::new();
        let endpoint = loader.socket_endpoint();
        let lock = Arc::new(LockManager::new(loader.lock_path()));
        let registry = Arc::new(ClientRegistry::new());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            ShutdownSettings::new(Duration::from_secs(2), Duration::from_millis(10)),
            Arc::clone(&registry) as Arc<dyn ClientNotifier>,
        ));
        let identity = DaemonIdentity {
            instance_id: Uuid::new_v4().to_string(),
            version: DAEMON_VERSION.to_owned(),
            min_client_version: min_client_version.to_owned(),
        };
        let mut record = LockRecord::for_current_process(
            &endpoint,
            identity.instance_id.clone(),
            min_client_version,
        );
        record.version = DAEMON_VERSION.to_owned();
        let server = DaemonServer::new(
            identity,
            Arc::clone(&registry),
            Arc::clone(&coordinator),
            handler,
            Arc::clone(&lock),
        )
        .expect("valid daemon versions");
        let listener = SocketListener::bind(&endpoint)
            .expect("bind daemon socket")
            .start(Arc::new(server))
            .expect("start accept loop");
        lock.write_lock(&record).expect("write lock record");
        Self {
            loader,
            lock,
            registry,
            coordinator,
            record,
            listener: Some(listener),
        }
    }

    pub fn endpoint(&self) -> SocketEndpoint {
        self.loader.socket_endpoint()
    }

    /// Client count currently stored in the lock record.
    pub fn stored_client_count(&self) -> Option<u64> {
        self.lock.read_lock().map(|record| record.client_count)
    }

    pub fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.shutdown();
            let _ = listener.join();
        }
        self.registry.close_all();
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        self.stop();
    }
}
