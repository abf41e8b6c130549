use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::{LOCK_TARGET, LockError, is_process_alive};

/// Age after which a claim left behind by a crashed contender is ignored.
pub(super) const CLAIM_STALE_AFTER: Duration = Duration::from_secs(10);

/// Exclusive right to write the lock record during election.
///
/// The claim file is removed when the guard drops.
#[derive(Debug)]
pub struct ClaimGuard {
    path: PathBuf,
}

impl ClaimGuard {
    /// Path of the claim file held by this guard.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to release election claim"
                );
            }
            _ => {}
        }
    }
}

/// Attempts to create the claim file, clearing one abandoned claim first.
pub(super) fn try_claim(path: &Path) -> Result<Option<ClaimGuard>, LockError> {
    for _ in 0..2 {
        match create_claim(path) {
            Ok(()) => {
                debug!(target: LOCK_TARGET, file = %path.display(), "election claim taken");
                return Ok(Some(ClaimGuard {
                    path: path.to_path_buf(),
                }));
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                if !claim_is_abandoned(path) {
                    debug!(target: LOCK_TARGET, file = %path.display(), "election claim held elsewhere");
                    return Ok(None);
                }
                warn!(
                    target: LOCK_TARGET,
                    file = %path.display(),
                    "removing abandoned election claim"
                );
                if let Err(source) = fs::remove_file(path)
                    && source.kind() != io::ErrorKind::NotFound
                {
                    return Err(LockError::Claim {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
            Err(source) => {
                return Err(LockError::Claim {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    Ok(None)
}

fn create_claim(path: &Path) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn claim_is_abandoned(path: &Path) -> bool {
    let holder = fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok());
    if holder.is_some_and(|pid| !is_process_alive(pid)) {
        return true;
    }
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= CLAIM_STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_while_first_is_held() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tetherd.lock.claim");
        let first = try_claim(&path).expect("claim").expect("first claim wins");
        assert!(try_claim(&path).expect("claim").is_none());
        drop(first);
        assert!(!path.exists(), "dropping the guard releases the claim");
        assert!(try_claim(&path).expect("claim").is_some());
    }

    #[test]
    fn claim_from_dead_process_is_reclaimed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tetherd.lock.claim");
        fs::write(&path, "99999999\n").expect("write abandoned claim");
        let guard = try_claim(&path).expect("claim");
        assert!(guard.is_some(), "abandoned claim should be replaced");
    }
}
