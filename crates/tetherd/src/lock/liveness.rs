use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Reports whether a process with `pid` exists.
///
/// Sends signal 0, which performs the permission and existence checks
/// without delivering anything. `EPERM` means the process exists but belongs
/// to another user, so it counts as alive.
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
