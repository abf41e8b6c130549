use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use tether_config::{SocketEndpoint, SocketParseError};
use tether_protocol::PROTOCOL_VERSION;

/// Contents of the lock file: who holds the daemon role and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Process id of the daemon.
    pub pid: u32,
    /// Endpoint the daemon listens on, in `unix://` or `tcp://` form.
    pub socket_path: String,
    /// Random identifier proving which daemon wrote the record.
    pub instance_id: String,
    /// Milliseconds since the Unix epoch when the daemon started.
    pub start_time: u64,
    /// Daemon release.
    pub version: String,
    /// Wire protocol the daemon speaks.
    pub protocol_version: u32,
    /// Oldest client release the daemon admits.
    pub min_client_version: String,
    /// Clients connected when the record was last written.
    #[serde(default)]
    pub client_count: u64,
}

impl LockRecord {
    /// Describes the current process as the daemon listening on `endpoint`.
    #[must_use]
    pub fn for_current_process(
        endpoint: &SocketEndpoint,
        instance_id: impl Into<String>,
        min_client_version: impl Into<String>,
    ) -> Self {
        Self {
            pid: std::process::id(),
            socket_path: endpoint.to_string(),
            instance_id: instance_id.into(),
            start_time: epoch_millis(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol_version: PROTOCOL_VERSION,
            min_client_version: min_client_version.into(),
            client_count: 0,
        }
    }

    /// Resolves the recorded endpoint. A bare path is read as a Unix socket.
    ///
    /// # Errors
    ///
    /// Returns the parse failure for malformed URLs.
    pub fn endpoint(&self) -> Result<SocketEndpoint, SocketParseError> {
        if self.socket_path.contains("://") {
            self.socket_path.parse()
        } else {
            Ok(SocketEndpoint::unix(self.socket_path.as_str()))
        }
    }

    pub(super) fn is_plausible(&self) -> bool {
        self.pid > 0 && !self.instance_id.trim().is_empty() && !self.socket_path.is_empty()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_camel_case_keys() {
        let record = LockRecord::for_current_process(
            &SocketEndpoint::unix("/run/tether/tetherd.sock"),
            "inst-1",
            "0.1.0",
        );
        let value = serde_json::to_value(&record).expect("serialise record");
        for key in [
            "pid",
            "socketPath",
            "instanceId",
            "startTime",
            "version",
            "protocolVersion",
            "minClientVersion",
            "clientCount",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["socketPath"], "unix:///run/tether/tetherd.sock");
    }

    #[test]
    fn bare_paths_resolve_to_unix_endpoints() {
        let mut record =
            LockRecord::for_current_process(&SocketEndpoint::tcp("127.0.0.1", 9780), "i", "0.1.0");
        assert_eq!(
            record.endpoint().expect("tcp endpoint"),
            SocketEndpoint::tcp("127.0.0.1", 9780)
        );
        record.socket_path = String::from("/tmp/tetherd.sock");
        assert_eq!(
            record.endpoint().expect("unix endpoint"),
            SocketEndpoint::unix("/tmp/tetherd.sock")
        );
    }
}
