//! Client side of the IPC substrate, used when another process is the
//! verified daemon.

mod client;
mod errors;

pub use self::client::{ProxyClient, UpgradeOutcome, run_stdio};
pub use self::errors::ProxyError;

const PROXY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::proxy");
