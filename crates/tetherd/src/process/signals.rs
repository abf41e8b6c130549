use std::io;
use std::sync::{Mutex, PoisonError};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Source of the external request to stop the daemon.
pub trait ShutdownSignal: Send + Sync {
    /// Starts listening. Called once before [`ShutdownSignal::wait`].
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot be installed.
    fn arm(&self) -> Result<(), SignalError>;

    /// Blocks until a signal arrives, returning its number, or until
    /// [`ShutdownSignal::close`] is called, returning `None`.
    fn wait(&self) -> Option<i32>;

    /// Wakes any waiter and stops listening.
    fn close(&self);
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Listens for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
///
/// Handlers are only installed by [`ShutdownSignal::arm`], so proxy and
/// standalone processes keep the default signal behaviour.
#[derive(Default)]
pub struct SystemShutdownSignal {
    signals: Mutex<Option<Signals>>,
    handle: Mutex<Option<Handle>>,
}

impl std::fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let armed = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        formatter
            .debug_struct("SystemShutdownSignal")
            .field("armed", &armed)
            .finish_non_exhaustive()
    }
}

impl SystemShutdownSignal {
    /// Builds an unarmed listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn arm(&self) -> Result<(), SignalError> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Ok(());
        }
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| SignalError::Install { source })?;
        *handle = Some(signals.handle());
        *self.signals.lock().unwrap_or_else(PoisonError::into_inner) = Some(signals);
        Ok(())
    }

    fn wait(&self) -> Option<i32> {
        let mut guard = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let signal = guard.as_mut()?.forever().next()?;
        info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        Some(signal)
    }

    fn close(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.close();
        }
    }
}
