//! Daemon side of the IPC substrate.
//!
//! [`DaemonServer`] serves each accepted connection as a session: the first
//! message must be a handshake, after which heartbeats, requests,
//! notifications and upgrade requests are handled in arrival order. Connected
//! clients live in the [`ClientRegistry`], which also delivers the shutdown
//! coordinator's broadcasts.

mod daemon;
mod handler;
mod registry;
mod session;
mod supervision;

pub use self::daemon::{DaemonIdentity, DaemonServer};
pub use self::handler::{EchoHandler, HandlerError, RequestHandler};
pub use self::registry::{ClientRegistry, SharedWriter};
pub use self::supervision::DaemonSupervisor;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");
