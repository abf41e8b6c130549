//! Client-side dialling with bounded timeouts.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};
#[cfg(unix)]
use std::os::fd::OwnedFd;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use tether_config::SocketEndpoint;

use super::{ConnectionStream, TransportError};

/// Connects to `endpoint`, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::Resolve`] when a TCP host cannot be resolved and
/// [`TransportError::Connect`] when the connection is refused or times out.
pub fn connect(
    endpoint: &SocketEndpoint,
    timeout: Duration,
) -> Result<ConnectionStream, TransportError> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(|source| {
                TransportError::Resolve {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            TcpStream::connect_timeout(&address, timeout)
                .map(ConnectionStream::Tcp)
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str(), timeout).map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }

            #[cfg(not(unix))]
            {
                let _ = (path, timeout);
                Err(TransportError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: Duration) -> io::Result<ConnectionStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)?;
    let stream = UnixStream::from(OwnedFd::from(socket));
    Ok(ConnectionStream::Unix(stream))
}
