//! Scripted stand-in for termination signals.

use std::sync::{Arc, Condvar, Mutex};

use crate::process::{ShutdownSignal, SignalError};

#[derive(Default)]
struct SignalState {
    armed: bool,
    fired: bool,
    closed: bool,
}

/// Shutdown signal fired explicitly by the test.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<SignalState>, Condvar)>,
}

impl TestShutdownSignal {
    /// Delivers a SIGTERM-equivalent to the waiter.
    pub fn trigger(&self) {
        let (state, condvar) = &*self.inner;
        state.lock().expect("signal state").fired = true;
        condvar.notify_all();
    }

    /// Whether a daemon started listening.
    pub fn is_armed(&self) -> bool {
        self.inner.0.lock().expect("signal state").armed
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn arm(&self) -> Result<(), SignalError> {
        let mut state = self.inner.0.lock().expect("signal state");
        state.armed = true;
        state.closed = false;
        Ok(())
    }

    fn wait(&self) -> Option<i32> {
        let (state, condvar) = &*self.inner;
        let mut guard = state.lock().expect("signal state");
        while !guard.fired && !guard.closed {
            guard = condvar.wait(guard).expect("signal state");
        }
        if guard.fired {
            guard.fired = false;
            Some(15)
        } else {
            None
        }
    }

    fn close(&self) {
        let (state, condvar) = &*self.inner;
        let mut guard = state.lock().expect("signal state");
        guard.closed = true;
        guard.armed = false;
        condvar.notify_all();
    }
}
