//! Local socket transport shared by the daemon and its clients.
//!
//! The daemon side binds a listener and accepts connections on a background
//! thread, handing each stream to a [`ConnectionHandler`]. The client side
//! dials with a bounded timeout. Both sides exchange newline-delimited
//! messages through [`LineReader`] and [`MessageWriter`].

mod connect;
mod errors;
mod framing;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub use self::connect::connect;
pub use self::errors::{ListenerError, TransportError};
pub use self::framing::{LineReader, MessageWriter};
pub use self::handler::{ConnectionHandler, ConnectionStream};
pub use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
