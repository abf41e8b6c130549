//! Listener implementation for daemon transport sockets.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use tether_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::{Path, PathBuf};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listener bound to a socket endpoint but not yet accepting.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        socket: BoundSocket,
    },
}

/// Identity of the socket file we created, so cleanup never unlinks a
/// successor's socket bound at the same path.
#[cfg(unix)]
#[derive(Debug, Clone)]
struct BoundSocket {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketListener {
    /// Binds `endpoint`, clearing a stale Unix socket file but refusing one
    /// that still accepts connections.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the address cannot be resolved or
    /// bound, or when another process is serving the socket.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        Self::bind_with(endpoint, false)
    }

    /// Binds `endpoint`, unlinking any existing Unix socket file first.
    ///
    /// Used when election has established that the process serving the
    /// socket is not a verified daemon and must be displaced.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the address cannot be bound.
    pub fn bind_replacing(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        Self::bind_with(endpoint, true)
    }

    fn bind_with(endpoint: &SocketEndpoint, replace: bool) -> Result<Self, ListenerError> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let listener = bind_tcp(host, *port)?;
                Ok(Self {
                    endpoint: endpoint.clone(),
                    listener: ListenerKind::Tcp(listener),
                })
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let (listener, socket) = bind_unix(path.as_std_path(), replace)?;
                    Ok(Self {
                        endpoint: endpoint.clone(),
                        listener: ListenerKind::Unix { listener, socket },
                    })
                }

                #[cfg(not(unix))]
                {
                    let _ = (path, replace);
                    Err(ListenerError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }
    }

    /// Endpoint clients should dial. A TCP port of zero is replaced by the
    /// port the operating system assigned.
    #[must_use]
    pub fn local_endpoint(&self) -> SocketEndpoint {
        match (&self.listener, &self.endpoint) {
            (ListenerKind::Tcp(listener), SocketEndpoint::Tcp { host, .. }) => listener
                .local_addr()
                .map_or_else(|_| self.endpoint.clone(), |addr| {
                    SocketEndpoint::tcp(host.clone(), addr.port())
                }),
            _ => self.endpoint.clone(),
        }
    }

    /// Starts the accept loop on a background thread. Each accepted
    /// connection is served on its own thread.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot be made non-blocking or the thread
    /// cannot be spawned. The Unix socket file is removed in both cases.
    pub fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        if let Err(error) = match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix { listener, .. } => listener.set_nonblocking(true),
        } {
            self.cleanup();
            return Err(ListenerError::NonBlocking { source: error });
        }
        let endpoint = self.local_endpoint();
        #[cfg(unix)]
        let bound = match &self.listener {
            ListenerKind::Unix { socket, .. } => Some(socket.clone()),
            ListenerKind::Tcp(_) => None,
        };
        let shutdown_flag = Arc::clone(&shutdown);
        let spawned = thread::Builder::new()
            .name(String::from("tetherd-accept"))
            .spawn(move || run_accept_loop(&self, &shutdown_flag, &handler));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                #[cfg(unix)]
                if let Some(socket) = bound {
                    cleanup_unix_socket(&socket);
                }
                return Err(ListenerError::Spawn { source });
            }
        };
        Ok(ListenerHandle {
            endpoint,
            shutdown,
            handle: Some(handle),
        })
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        if let ListenerKind::Unix { socket, .. } = &self.listener {
            cleanup_unix_socket(socket);
        }
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub struct ListenerHandle {
    endpoint: SocketEndpoint,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Endpoint the listener is serving.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Asks the accept loop to stop. Connections already accepted are not
    /// affected.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        self.handle.take().map_or(Ok(()), |handle| {
            handle.join().map_err(|_| ListenerError::ThreadPanic)
        })
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &SocketListener,
    shutdown: &AtomicBool,
    handler: &Arc<dyn ConnectionHandler>,
) {
    info!(
        target: LISTENER_TARGET,
        endpoint = %listener.endpoint,
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(listener) {
            Ok(Some(stream)) => {
                last_error = None;
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name(String::from("tetherd-session"))
                    .spawn(move || handler.handle(stream));
                if let Err(error) = spawned {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "failed to spawn connection thread; connection dropped"
                    );
                }
            }
            Ok(None) => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    listener.cleanup();
    info!(target: LISTENER_TARGET, endpoint = %listener.endpoint, "socket listener stopped");
}

fn accept_connection(listener: &SocketListener) -> Result<Option<ConnectionStream>, io::Error> {
    match &listener.listener {
        ListenerKind::Tcp(tcp) => match tcp.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Tcp(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
        #[cfg(unix)]
        ListenerKind::Unix { listener, .. } => match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Unix(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
    let addr = addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_string(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path, replace: bool) -> Result<(UnixListener, BoundSocket), ListenerError> {
    if fs::symlink_metadata(path).is_ok() {
        clear_existing_socket(path, replace)?;
    }

    let listener = UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })?;
    let metadata = fs::metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: path.display().to_string(),
        source,
    })?;
    let socket = BoundSocket {
        path: path.to_path_buf(),
        dev: metadata.dev(),
        ino: metadata.ino(),
    };
    Ok((listener, socket))
}

#[cfg(unix)]
fn clear_existing_socket(path: &Path, replace: bool) -> Result<(), ListenerError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: path.display().to_string(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket {
            path: path.display().to_string(),
        });
    }
    if !replace {
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::UnixInUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(ListenerError::UnixConnect {
                    path: path.display().to_string(),
                    source: error,
                });
            }
        }
    }
    debug!(
        target: LISTENER_TARGET,
        path = %path.display(),
        replace,
        "removing existing unix socket"
    );
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(ListenerError::UnixCleanup {
            path: path.display().to_string(),
            source: error,
        }),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn cleanup_unix_socket(socket: &BoundSocket) {
    let still_ours = fs::symlink_metadata(&socket.path)
        .is_ok_and(|metadata| metadata.dev() == socket.dev && metadata.ino() == socket.ino);
    if !still_ours {
        debug!(
            target: LISTENER_TARGET,
            path = %socket.path.display(),
            "unix socket replaced by another listener; leaving it in place"
        );
        return;
    }
    if let Err(error) = fs::remove_file(&socket.path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %socket.path.display(),
            "failed to remove unix socket file"
        );
    }
}
