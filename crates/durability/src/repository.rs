//! Working-tree lifecycle around a backend
//!
//! `Repository` boots the data directory (init or clone), keeps the online
//! remote registered, rolls back directories it created when boot fails, and
//! serializes commits: two concurrent commits on one working tree corrupt it.

use crate::backend::Backend;
use crate::user::User;
use chrono::{DateTime, FixedOffset};
use gitstore_core::{Error, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Receives operator-facing notifications
pub trait Notifier: Send + Sync {
    /// The remote refused our credentials
    fn access_denied(&self, remote: &str, ssh_key: Option<&Path>);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn access_denied(&self, remote: &str, ssh_key: Option<&Path>) {
        warn!(
            target: "gitstore::backend",
            remote = %remote,
            ssh_key = ?ssh_key,
            "Access denied by online remote; grant the public key of this ssh key access"
        );
    }
}

/// Outcome of [`Repository::setup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    /// The working tree already existed
    Existing,
    /// A new empty working tree was created
    Initialized,
    /// The working tree was cloned from the remote
    Cloned,
}

/// A backend bound to one data directory
pub struct Repository {
    backend: Arc<dyn Backend>,
    data_dir: PathBuf,
    remote: Option<String>,
    ssh_key: Option<PathBuf>,
    notifier: Arc<dyn Notifier>,
    commit_lock: Mutex<()>,
}

impl Repository {
    /// Wrap `backend`
    pub fn new(
        backend: Arc<dyn Backend>,
        data_dir: impl Into<PathBuf>,
        remote: Option<String>,
        ssh_key: Option<PathBuf>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            backend,
            data_dir: data_dir.into(),
            remote,
            ssh_key,
            notifier,
            commit_lock: Mutex::new(()),
        }
    }

    /// Underlying backend
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Whether an online remote is configured
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Make sure the data directory is a usable working tree.
    ///
    /// # Errors
    ///
    /// `AccessDenied` when the remote refuses the clone, `Backend` when the
    /// directory exists but is not a working tree.
    pub fn setup(&self) -> Result<Boot> {
        if !self.data_dir.exists() {
            return match &self.remote {
                Some(remote) => {
                    self.guarded(|| self.backend.clone_remote())
                        .map_err(|e| self.classify_clone_error(remote, e))?;
                    self.guarded(|| self.backend.add_remote())?;
                    info!(target: "gitstore::backend", remote = %remote, "Cloned online repository");
                    Ok(Boot::Cloned)
                }
                None => {
                    self.guarded(|| self.backend.init())?;
                    Ok(Boot::Initialized)
                }
            };
        }

        if !self.backend.is_repository() {
            return Err(Error::backend(format!(
                "{} is not a git repository",
                self.data_dir.display()
            )));
        }
        if self.remote.is_some() && !self.backend.has_remote() {
            self.backend.add_remote()?;
        }
        Ok(Boot::Existing)
    }

    /// Run a boot step, deleting the data directory if it fails
    fn guarded(&self, step: impl FnOnce() -> Result<()>) -> Result<()> {
        step().map_err(|e| {
            if let Err(rm) = fs::remove_dir_all(&self.data_dir) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    error!(target: "gitstore::backend", error = %rm, "Could not remove data dir");
                }
            }
            e
        })
    }

    fn classify_clone_error(&self, remote: &str, e: Error) -> Error {
        match &e {
            Error::Backend(msg) if msg.to_lowercase().contains("denied") => {
                self.notifier.access_denied(remote, self.ssh_key.as_deref());
                Error::AccessDenied
            }
            _ => e,
        }
    }

    /// Commit `path`, one commit at a time
    pub fn commit(&self, path: &str, message: &str, user: &User) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.backend.commit(path, message, user)
    }

    /// Pull from the remote
    pub fn pull(&self) -> Result<()> {
        self.backend.pull()
    }

    /// Push to the remote
    pub fn push(&self) -> Result<()> {
        self.backend.push()
    }

    /// Revert uncommitted changes
    pub fn undo(&self) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.backend.undo()
    }

    /// Files changed on the remote
    pub fn changed_files(&self) -> Result<Vec<String>> {
        self.backend.changed_files()
    }

    /// Most recent remote commit time
    pub fn last_commit_time(&self) -> Result<DateTime<FixedOffset>> {
        self.backend.last_commit_time()
    }
}
