//! Single-record lock naming the process that currently holds the daemon
//! role.
//!
//! The record lives at a path injected by the caller, is replaced atomically
//! on every write, and is only ever removed by the instance it names.

mod claim;
mod errors;
mod files;
mod liveness;
mod manager;
mod record;

pub use claim::ClaimGuard;
pub use errors::LockError;
pub use liveness::is_process_alive;
pub use manager::LockManager;
pub use record::LockRecord;

const LOCK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lock");
