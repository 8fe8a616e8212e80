//! Connection to one store root
//!
//! A [`Connection`] owns everything that is live for an open store: the block
//! cache, the index cache, the staging queue, the advisory lock, the event
//! channel feeding the commit loop, and the sync clock.
//!
//! Connections are created by [`ConnectionManager`], which keeps at most one
//! live connection per canonical root path. The operations themselves are
//! spread over the `write`, `read`, `transaction` and `migration` modules.
//!
//! # Lifecycle
//!
//! ```text
//! open ──► boot (process lock, repository setup, first-boot index build)
//!      ──► commit loop + sync clock running
//! close ──► flush queues and index ──► stop threads ──► deregister
//! ```
//!
//! Dropping the last handle closes the connection.

mod manager;

pub use manager::{ConnectionManager, OpenOptions};

use crate::config::Config;
use crate::coordinator::{spawn_commit_loop, spawn_sync_clock, PendingCommits, ShutdownSignal};
use crate::lock::AdvisoryLock;
use crate::model::ModelRegistry;
use crate::power::{has_sufficient_power, MainsPower, PowerMonitor};
use crate::queue::{IdCounter, StagingQueue};
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use fs2::FileExt;
use gitstore_core::{Error, Event, EventKind, Result};
use gitstore_durability::{
    Backend, BackendKind, GitBinary, LocalBackend, LogNotifier, Notifier, Repository, User,
};
use gitstore_storage::{Block, Dataset, IndexManager, Layout};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

pub(crate) type Registry = Mutex<HashMap<PathBuf, Weak<Connection>>>;

/// An open store
pub struct Connection {
    pub(crate) config: Config,
    pub(crate) layout: Layout,
    pub(crate) key: Option<Vec<u8>>,
    pub(crate) repo: Arc<Repository>,
    pub(crate) indexes: IndexManager,
    /// Fully loaded blocks keyed by absolute path
    pub(crate) blocks: DashMap<PathBuf, Block>,
    pub(crate) registry: ModelRegistry,
    pub(crate) gate: AdvisoryLock,
    /// Serializes block mutation and cache fills
    pub(crate) write_mu: Mutex<()>,
    pub(crate) queue: StagingQueue,
    pub(crate) ids: IdCounter,
    pub(crate) txn_lock: ReentrantMutex<()>,
    pub(crate) txn_depth: AtomicUsize,
    /// Thread running the outermost transaction
    pub(crate) txn_owner: Mutex<Option<ThreadId>>,
    pub(crate) pending: Arc<PendingCommits>,
    events: Mutex<Option<SyncSender<Event>>>,
    user: Arc<RwLock<User>>,
    power: Arc<dyn PowerMonitor>,
    closed: AtomicBool,
    shutdown: Arc<ShutdownSignal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    process_lock: Mutex<Option<File>>,
    open_connections: Weak<Registry>,
}

impl Connection {
    /// Boot a store whose root has already been created and canonicalized
    pub(crate) fn boot(
        config: Config,
        options: OpenOptions,
        open_connections: Weak<Registry>,
    ) -> Result<Arc<Self>> {
        let layout = config.layout();
        let key = config.key().map(<[u8]>::to_vec);

        fs::create_dir_all(layout.internal_dir())?;
        let lock_path = layout.process_lock_file();
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|e| {
            Error::ConnectionInvalid(format!(
                "{} is in use by another process: {e}",
                config.db_path.display()
            ))
        })?;

        let OpenOptions {
            backend,
            power_monitor,
            notifier,
            registry,
            sync_interval,
        } = options;
        let backend: Arc<dyn Backend> = match backend {
            Some(b) => b,
            None => match config.backend {
                BackendKind::Git => Arc::new(GitBinary::new(config.backend_config())),
                BackendKind::Local => Arc::new(LocalBackend::new(config.backend_config())),
            },
        };
        let notifier: Arc<dyn Notifier> = notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let power = power_monitor.unwrap_or_else(|| Arc::new(MainsPower));

        let repo = Arc::new(Repository::new(
            Arc::clone(&backend),
            layout.data_dir(),
            config.online_remote.clone(),
            config.ssh_key.clone(),
            notifier,
        ));
        let boot = repo.setup()?;
        info!(
            target: "gitstore::db",
            path = ?config.db_path,
            backend = backend.name(),
            boot = ?boot,
            "Store opened"
        );

        let indexes = IndexManager::new(layout.clone());
        if !indexes.exists() {
            fs::create_dir_all(layout.index_dir())?;
            indexes.build_index(key.as_deref(), Some(&registry))?;
            indexes.flush()?;
        }

        let (tx, rx) = sync_channel(1);
        let pending = Arc::new(PendingCommits::new());
        let user = Arc::new(RwLock::new(config.user.clone()));
        let commit_repo = Arc::clone(&repo);
        let commit_user = Arc::clone(&user);
        let commit_loop = spawn_commit_loop(rx, Arc::clone(&pending), move |event| {
            let author = commit_user.read().clone();
            commit_repo.commit(&event.path, &event.description, &author)
        })?;

        let conn = Arc::new(Self {
            queue: StagingQueue::new(layout.clone()),
            ids: IdCounter::new(layout.clone()),
            layout,
            key,
            repo,
            indexes,
            blocks: DashMap::new(),
            registry,
            gate: AdvisoryLock::new(),
            write_mu: Mutex::new(()),
            txn_lock: ReentrantMutex::new(()),
            txn_depth: AtomicUsize::new(0),
            txn_owner: Mutex::new(None),
            pending,
            events: Mutex::new(Some(tx)),
            user,
            power,
            closed: AtomicBool::new(false),
            shutdown: Arc::new(ShutdownSignal::new()),
            threads: Mutex::new(vec![commit_loop]),
            process_lock: Mutex::new(Some(lock_file)),
            open_connections,
            config,
        });

        if conn.repo.has_remote() {
            let weak = Arc::downgrade(&conn);
            let clock = spawn_sync_clock(
                sync_interval.unwrap_or_else(|| conn.config.sync_interval()),
                Arc::clone(&conn.shutdown),
                move || weak.upgrade().map_or(false, |c| c.sync_tick()),
            )?;
            conn.threads.lock().push(clock);
        }
        Ok(conn)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration this connection was opened with
    pub fn config(&self) -> Result<&Config> {
        self.ensure_open()?;
        Ok(&self.config)
    }

    /// Canonical store root
    pub fn root(&self) -> &Path {
        &self.config.db_path
    }

    /// Path layout of the store
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Whether [`Connection::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Change the commit author for subsequent commits
    pub fn set_user(&self, user: User) -> Result<()> {
        self.ensure_open()?;
        info!(target: "gitstore::db", user = %user, "Commit author changed");
        *self.user.write() = user;
        Ok(())
    }

    /// Current commit author
    pub fn user(&self) -> User {
        self.user.read().clone()
    }

    /// Time of the latest commit on the remote branch
    pub fn last_commit_time(&self) -> Result<DateTime<FixedOffset>> {
        self.ensure_open()?;
        self.repo.last_commit_time()
    }

    /// Every dataset in the store
    pub fn datasets(&self) -> Result<Vec<Dataset>> {
        self.ensure_open()?;
        Dataset::list(&self.layout, self.key.as_deref())
    }

    /// One dataset; it need not exist yet
    pub fn dataset(&self, name: &str) -> Result<Dataset> {
        self.ensure_open()?;
        Ok(Dataset::open(&self.layout, name, self.key.as_deref()))
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Commits happen per operation only outside transactions
    pub(crate) fn autocommit(&self) -> bool {
        self.txn_depth.load(Ordering::SeqCst) == 0
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Hand an event to the commit loop, blocking while the queue is full
    pub(crate) fn emit(&self, event: Event) {
        let Some(tx) = self.events.lock().clone() else {
            debug!(target: "gitstore::db", kind = %event.kind, "Event after shutdown dropped");
            return;
        };
        let counted = matches!(event.kind, EventKind::Write | EventKind::Delete);
        if counted {
            self.pending.add();
        }
        if tx.send(event).is_err() {
            warn!(target: "gitstore::db", "Commit loop is gone; event dropped");
            if counted {
                self.pending.done();
            }
        }
    }

    /// Hand a read event to the commit loop unless the queue is full
    pub(crate) fn emit_read(&self, path: String, description: String) {
        let Some(tx) = self.events.lock().clone() else {
            return;
        };
        if let Err(TrySendError::Disconnected(_)) =
            tx.try_send(Event::new(EventKind::Read, path, description, false))
        {
            debug!(target: "gitstore::db", "Commit loop is gone; read event dropped");
        }
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Pull then push, then reload all in-memory state.
    ///
    /// Waits for direct writers, running transactions and any running sync
    /// round.
    ///
    /// # Errors
    ///
    /// `NoOnlineRemote` without a remote, `LowBattery` below the configured
    /// power floor, `SyncFailed` when pull or push fails, `InvalidInput` when
    /// called from an operation of a running transaction.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        if *self.txn_owner.lock() == Some(thread::current().id()) {
            return Err(Error::invalid_input("sync cannot run inside a transaction"));
        }
        self.sync_round(true).map(|_| ())
    }

    /// One clock tick; returns false to stop the clock
    fn sync_tick(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if !self.autocommit() {
            debug!(target: "gitstore::sync", "Transaction running, skipping sync");
            return true;
        }
        if !has_sufficient_power(self.power.as_ref(), self.config.min_power_percent) {
            debug!(target: "gitstore::sync", "Low battery, skipping sync");
            return true;
        }
        match self.sync_round(false) {
            Ok(true) => {}
            Ok(false) => debug!(target: "gitstore::sync", "Store busy, skipping sync"),
            Err(e) => warn!(target: "gitstore::sync", error = %e, "Sync failed"),
        }
        true
    }

    /// Returns false when `wait` is off and the lock was taken
    fn sync_round(&self, wait: bool) -> Result<bool> {
        if !self.repo.has_remote() {
            return Err(Error::NoOnlineRemote);
        }
        if !has_sufficient_power(self.power.as_ref(), self.config.min_power_percent) {
            return Err(Error::LowBattery);
        }
        {
            let _round = if wait {
                self.gate.sync()
            } else {
                match self.gate.try_sync() {
                    Some(g) => g,
                    None => return Ok(false),
                }
            };
            self.pending.wait();
            debug!(target: "gitstore::sync", "Sync round started");
            self.repo
                .pull()
                .map_err(|e| Error::SyncFailed(format!("pull: {e}")))?;
            self.repo
                .push()
                .map_err(|e| Error::SyncFailed(format!("push: {e}")))?;
            self.blocks.clear();
            self.indexes
                .build_index(self.key.as_deref(), Some(&self.registry))?;
            self.indexes.flush()?;
        }
        info!(target: "gitstore::sync", "Sync round finished");

        if let Some(_writer) = self.gate.try_writer() {
            self.flush_all_queues()?;
        }
        Ok(true)
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Flush staged records and indexes, stop background threads, and
    /// release the store. Later calls do nothing.
    ///
    /// Every other operation fails with `ConnectionClosed` afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(target: "gitstore::db", path = ?self.config.db_path, "Closing store");

        let mut first_err = None;
        {
            // Waits for a running sync round
            let _writer = self.gate.writer();
            if let Err(e) = self.flush_all_queues() {
                warn!(target: "gitstore::db", error = %e, "Queue flush on close failed");
                first_err.get_or_insert(e);
            }
            if let Err(e) = self.indexes.flush() {
                warn!(target: "gitstore::db", error = %e, "Index flush on close failed");
                first_err.get_or_insert(e);
            }
        }

        self.shutdown.trigger();
        self.pending.wait();
        if let Some(tx) = self.events.lock().take() {
            // The loop may already be gone
            let _ = tx.send(Event::shutdown());
        }

        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(target: "gitstore::db", "Background thread panicked");
            }
        }

        if let Some(file) = self.process_lock.lock().take() {
            if let Err(e) = file.unlock() {
                warn!(target: "gitstore::db", error = %e, "Could not release process lock");
            }
        }
        self.deregister();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn deregister(&self) {
        let Some(open) = self.open_connections.upgrade() else {
            return;
        };
        let mut open = open.lock();
        let is_self = open
            .get(&self.config.db_path)
            .map_or(false, |w| std::ptr::eq(w.as_ptr(), self));
        if is_self {
            open.remove(&self.config.db_path);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "gitstore::db", error = %e, "Close on drop failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("root", &self.config.db_path)
            .field("closed", &self.is_closed())
            .field("cached_blocks", &self.blocks.len())
            .finish()
    }
}
