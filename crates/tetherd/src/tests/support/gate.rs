//! Request handler that holds requests open on demand.

use std::sync::{Condvar, Mutex};

use serde_json::Value;

use crate::server::{HandlerError, RequestHandler};

/// Handler that parks every request until released.
#[derive(Default)]
pub struct GateHandler {
    open: Mutex<bool>,
    opened: Condvar,
}

impl GateHandler {
    pub fn release(&self) {
        *self.open.lock().expect("gate") = true;
        self.opened.notify_all();
    }
}

impl RequestHandler for GateHandler {
    fn handle(&self, payload: Value, _client_id: &str) -> Result<Value, HandlerError> {
        let mut open = self.open.lock().expect("gate");
        while !*open {
            open = self.opened.wait(open).expect("gate");
        }
        Ok(payload)
    }
}
