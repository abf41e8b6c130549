use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::claim::{self, ClaimGuard};
use super::files::atomic_write;
use super::{LOCK_TARGET, LockError, LockRecord, liveness};

/// Reads and writes the daemon lock record at a fixed path.
///
/// Writes are serialised within the process and remember which instance
/// this manager wrote, so [`LockManager::close`] and
/// [`LockManager::update_client_count`] never touch a successor's record.
#[derive(Debug)]
pub struct LockManager {
    path: PathBuf,
    claim_path: PathBuf,
    owned_instance: Mutex<Option<String>>,
}

impl LockManager {
    /// Builds a manager for the lock file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut claim_name = path
            .file_name()
            .map_or_else(|| OsString::from("tetherd.lock"), ToOwned::to_owned);
        claim_name.push(".claim");
        let claim_path = path.with_file_name(claim_name);
        Self {
            path,
            claim_path,
            owned_instance: Mutex::new(None),
        }
    }

    /// Location of the lock record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the election claim file.
    #[must_use]
    pub fn claim_path(&self) -> &Path {
        &self.claim_path
    }

    /// Reads the current record. Missing, unreadable and malformed files all
    /// read as `None`; the latter two are logged.
    #[must_use]
    pub fn read_lock(&self) -> Option<LockRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "lock file unreadable"
                );
                return None;
            }
        };
        match serde_json::from_str::<LockRecord>(&contents) {
            Ok(record) if record.is_plausible() => Some(record),
            Ok(record) => {
                warn!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    pid = record.pid,
                    "lock record is incomplete; ignoring"
                );
                None
            }
            Err(error) => {
                warn!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "lock record is malformed; ignoring"
                );
                None
            }
        }
    }

    /// Atomically replaces the record and remembers its instance as ours.
    ///
    /// # Errors
    ///
    /// Fails when the record cannot be encoded or written.
    pub fn write_lock(&self, record: &LockRecord) -> Result<(), LockError> {
        let mut owned = self.owned();
        self.persist(record)?;
        *owned = Some(record.instance_id.clone());
        info!(
            target: LOCK_TARGET,
            file = %self.path.display(),
            pid = record.pid,
            instance_id = %record.instance_id,
            "lock record written"
        );
        Ok(())
    }

    /// Rewrites our record with a new client count.
    ///
    /// Returns `false` without writing when the file no longer names the
    /// instance this manager wrote.
    ///
    /// # Errors
    ///
    /// Fails when the updated record cannot be written.
    pub fn update_client_count(&self, count: u64) -> Result<bool, LockError> {
        let owned = self.owned();
        let Some(instance_id) = owned.as_deref() else {
            return Ok(false);
        };
        let Some(mut record) = self.read_lock().filter(|record| record.instance_id == instance_id)
        else {
            warn!(
                target: LOCK_TARGET,
                instance_id,
                "lock record no longer ours; client count not updated"
            );
            return Ok(false);
        };
        if record.client_count == count {
            return Ok(true);
        }
        record.client_count = count;
        self.persist(&record)?;
        debug!(target: LOCK_TARGET, client_count = count, "client count updated");
        Ok(true)
    }

    /// Reports whether the file still names the instance this manager wrote.
    #[must_use]
    pub fn holds_lock(&self) -> bool {
        let owned = self.owned();
        owned.as_deref().is_some_and(|instance_id| {
            self.read_lock()
                .is_some_and(|record| record.instance_id == instance_id)
        })
    }

    /// Removes the record if it still names our instance.
    ///
    /// Returns whether a file was removed. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when our record exists but cannot be removed.
    pub fn close(&self) -> Result<bool, LockError> {
        let mut owned = self.owned();
        let Some(instance_id) = owned.take() else {
            return Ok(false);
        };
        let ours = self
            .read_lock()
            .is_some_and(|record| record.instance_id == instance_id);
        if !ours {
            info!(
                target: LOCK_TARGET,
                instance_id = %instance_id,
                "lock record belongs to a successor; leaving it in place"
            );
            return Ok(false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(target: LOCK_TARGET, file = %self.path.display(), "lock record removed");
                Ok(true)
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LockError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Takes the election claim, or returns `None` while another contender
    /// holds it.
    ///
    /// # Errors
    ///
    /// Fails when the claim file cannot be created for reasons other than
    /// contention.
    pub fn try_claim(&self) -> Result<Option<ClaimGuard>, LockError> {
        claim::try_claim(&self.claim_path)
    }

    /// Probes whether `pid` refers to a running process.
    #[must_use]
    pub fn is_process_alive(pid: u32) -> bool {
        liveness::is_process_alive(pid)
    }

    fn persist(&self, record: &LockRecord) -> Result<(), LockError> {
        let mut contents = serde_json::to_vec_pretty(record)
            .map_err(|source| LockError::Serialise { source })?;
        contents.push(b'\n');
        atomic_write(&self.path, &contents).map_err(|source| LockError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn owned(&self) -> MutexGuard<'_, Option<String>> {
        self.owned_instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use tether_config::SocketEndpoint;

    struct LockFixture {
        _dir: TempDir,
        manager: LockManager,
    }

    #[fixture]
    fn lock() -> LockFixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let manager = LockManager::new(dir.path().join("tetherd.lock"));
        LockFixture { _dir: dir, manager }
    }

    fn record(instance_id: &str) -> LockRecord {
        LockRecord::for_current_process(
            &SocketEndpoint::unix("/tmp/tether/tetherd.sock"),
            instance_id,
            "0.1.0",
        )
    }

    #[rstest]
    fn missing_file_reads_as_none(lock: LockFixture) {
        assert!(lock.manager.read_lock().is_none());
    }

    #[rstest]
    fn write_then_read_returns_record(lock: LockFixture) {
        let written = record("inst-a");
        lock.manager.write_lock(&written).expect("write lock");
        assert_eq!(lock.manager.read_lock(), Some(written));
        let text = fs::read_to_string(lock.manager.path()).expect("read file");
        assert!(text.contains("\n  \"pid\""), "record should be pretty printed");
    }

    #[rstest]
    #[case("")]
    #[case("not json")]
    #[case("{\"pid\": 1}")]
    #[case("{\"pid\":0,\"socketPath\":\"/s\",\"instanceId\":\"x\",\"startTime\":0,\"version\":\"1\",\"protocolVersion\":1,\"minClientVersion\":\"0\"}")]
    fn malformed_records_read_as_none(lock: LockFixture, #[case] contents: &str) {
        fs::write(lock.manager.path(), contents).expect("write garbage");
        assert!(lock.manager.read_lock().is_none());
    }

    #[rstest]
    fn close_removes_only_our_record(lock: LockFixture) {
        lock.manager.write_lock(&record("inst-a")).expect("write ours");
        let successor = LockManager::new(lock.manager.path());
        successor
            .write_lock(&record("inst-b"))
            .expect("successor overwrites");

        assert!(!lock.manager.close().expect("close"), "successor's record kept");
        assert_eq!(
            lock.manager.read_lock().map(|r| r.instance_id),
            Some(String::from("inst-b"))
        );
        assert!(successor.close().expect("successor close"));
        assert!(!lock.manager.path().exists());
    }

    #[rstest]
    fn close_without_writing_is_a_no_op(lock: LockFixture) {
        assert!(!lock.manager.close().expect("close"));
    }

    #[rstest]
    fn client_count_updates_in_place(lock: LockFixture) {
        lock.manager.write_lock(&record("inst-a")).expect("write lock");
        assert!(lock.manager.update_client_count(3).expect("update"));
        let stored = lock.manager.read_lock().expect("record present");
        assert_eq!(stored.client_count, 3);
        assert_eq!(stored.instance_id, "inst-a");
        assert!(lock.manager.holds_lock());
    }

    #[rstest]
    fn client_count_ignored_once_record_is_replaced(lock: LockFixture) {
        lock.manager.write_lock(&record("inst-a")).expect("write lock");
        LockManager::new(lock.manager.path())
            .write_lock(&record("inst-b"))
            .expect("replace");
        assert!(!lock.manager.update_client_count(7).expect("update"));
        assert!(!lock.manager.holds_lock());
        assert_eq!(lock.manager.read_lock().map(|r| r.client_count), Some(0));
    }

    #[rstest]
    fn claim_path_sits_beside_the_lock(lock: LockFixture) {
        assert_eq!(
            lock.manager.claim_path(),
            lock.manager.path().with_file_name("tetherd.lock.claim")
        );
    }
}
