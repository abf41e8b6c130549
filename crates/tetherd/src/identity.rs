//! Identity a process presents when it handshakes with the daemon.

use tether_protocol::Message;
use uuid::Uuid;

/// Version of this build, as carried in handshakes and the lock record.
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Optional protocol features this build supports.
pub const CAPABILITIES: &[&str] = &["heartbeat", "upgrade", "notifications"];

/// How a client introduces itself to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Identifier unique to this connection.
    pub client_id: String,
    /// Client build version.
    pub version: String,
    /// Optional features the client supports.
    pub capabilities: Vec<String>,
    /// Client process id.
    pub pid: u32,
}

impl ClientIdentity {
    /// Identity of the running process with a fresh random client id.
    #[must_use]
    pub fn current() -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            version: BUILD_VERSION.to_owned(),
            capabilities: CAPABILITIES.iter().map(|cap| (*cap).to_owned()).collect(),
            pid: std::process::id(),
        }
    }

    /// Replaces the advertised version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Same identity under a new random client id.
    #[must_use]
    pub fn renewed(&self) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    /// Builds the handshake announcing this identity.
    #[must_use]
    pub fn handshake(&self) -> Message {
        Message::handshake(
            self.client_id.clone(),
            self.version.clone(),
            self.capabilities.clone(),
            self.pid,
        )
    }
}
