//! Locks
//!
//! Two unrelated mechanisms live here:
//!
//! - [`AdvisoryLock`]: the per-connection gate between direct writes and a
//!   sync round. A sync round is exclusive; direct writers share the gate.
//!   Writers that find a sync running do not wait, they stage their record.
//! - Lock markers: application-level files under `data/<Dataset>/Lock/`
//!   serializing workflows over a logical resource.

use gitstore_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Default)]
struct GateState {
    syncing: bool,
    writers: usize,
}

/// Gate between direct writers and sync rounds
#[derive(Debug, Default)]
pub struct AdvisoryLock {
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Held by a direct writer
#[must_use]
pub struct WriterGuard<'a> {
    lock: &'a AdvisoryLock,
}

/// Held by a sync round
#[must_use]
pub struct SyncGuard<'a> {
    lock: &'a AdvisoryLock,
}

impl AdvisoryLock {
    /// Open gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter as a writer unless a sync round holds the gate
    pub fn try_writer(&self) -> Option<WriterGuard<'_>> {
        let mut st = self.state.lock();
        if st.syncing {
            return None;
        }
        st.writers += 1;
        Some(WriterGuard { lock: self })
    }

    /// Enter as a writer, waiting for a running sync round to finish
    pub fn writer(&self) -> WriterGuard<'_> {
        let mut st = self.state.lock();
        while st.syncing {
            self.cond.wait(&mut st);
        }
        st.writers += 1;
        WriterGuard { lock: self }
    }

    /// Start a sync round unless writers or another round are active
    pub fn try_sync(&self) -> Option<SyncGuard<'_>> {
        let mut st = self.state.lock();
        if st.syncing || st.writers > 0 {
            return None;
        }
        st.syncing = true;
        Some(SyncGuard { lock: self })
    }

    /// Start a sync round, waiting for writers and other rounds
    pub fn sync(&self) -> SyncGuard<'_> {
        let mut st = self.state.lock();
        while st.syncing || st.writers > 0 {
            self.cond.wait(&mut st);
        }
        st.syncing = true;
        SyncGuard { lock: self }
    }

    /// Whether a sync round holds the gate
    pub fn is_syncing(&self) -> bool {
        self.state.lock().syncing
    }

    /// Active direct writers
    pub fn writers(&self) -> usize {
        self.state.lock().writers
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.lock.state.lock();
        st.writers -= 1;
        if st.writers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.lock().syncing = false;
        self.lock.cond.notify_all();
    }
}

// ============================================================================
// Lock markers
// ============================================================================

/// Create one marker per name under `dir`.
///
/// Fails with `LockAlreadyExists` if any marker is present; markers created
/// by this call are removed again on failure.
pub fn create_markers(dir: &Path, names: &[String]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut created = Vec::with_capacity(names.len());
    for name in names {
        let marker = dir.join(name);
        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker);
        match result {
            Ok(_) => created.push(marker),
            Err(e) => {
                remove_markers(&created);
                return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                    Error::LockAlreadyExists(marker)
                } else {
                    e.into()
                });
            }
        }
    }
    Ok(created)
}

/// Remove the markers for `names` under `dir`; absent markers are skipped
pub fn release_markers(dir: &Path, names: &[String]) -> Result<()> {
    for name in names {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn remove_markers(paths: &[PathBuf]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            warn!(target: "gitstore::db", path = ?p, error = %e, "Could not remove lock marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn writers_share_and_block_sync() {
        let lock = AdvisoryLock::new();
        let w1 = lock.try_writer().unwrap();
        let w2 = lock.try_writer().unwrap();
        assert_eq!(lock.writers(), 2);
        assert!(lock.try_sync().is_none());
        drop(w1);
        drop(w2);
        let s = lock.try_sync().unwrap();
        assert!(lock.is_syncing());
        drop(s);
        assert!(!lock.is_syncing());
    }

    #[test]
    fn sync_round_turns_writers_away() {
        let lock = AdvisoryLock::new();
        let s = lock.try_sync().unwrap();
        assert!(lock.try_writer().is_none());
        assert!(lock.try_sync().is_none());
        drop(s);
        assert!(lock.try_writer().is_some());
    }

    #[test]
    fn blocking_sync_waits_for_writers() {
        let lock = Arc::new(AdvisoryLock::new());
        let w = lock.try_writer().unwrap();
        let lock2 = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _s = lock2.sync();
            lock2.writers()
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!lock.is_syncing());
        drop(w);
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn markers_fail_and_roll_back() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().join("Room").join("Lock");
        let names = vec!["r1".to_string(), "r2".to_string()];
        create_markers(&lock_dir, &names).unwrap();
        assert!(lock_dir.join("r1").exists());

        let overlapping = vec!["r0".to_string(), "r2".to_string()];
        let err = create_markers(&lock_dir, &overlapping).unwrap_err();
        assert!(matches!(err, Error::LockAlreadyExists(p) if p.ends_with("r2")));
        assert!(!lock_dir.join("r0").exists());

        release_markers(&lock_dir, &names).unwrap();
        release_markers(&lock_dir, &names).unwrap();
        assert!(!lock_dir.join("r1").exists());
        create_markers(&lock_dir, &overlapping).unwrap();
    }
}
