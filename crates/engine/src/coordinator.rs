//! Background commit loop and sync clock
//!
//! Every open connection runs at most two long-lived threads:
//!
//! - **commit loop** (`gitstore-commit`): consumes the bounded event queue and
//!   commits write/delete events that ask for it
//! - **sync clock** (`gitstore-sync`): fires on a fixed interval and runs one
//!   sync round; only started when a remote is configured
//!
//! # Thread Lifecycle
//!
//! - The commit loop ends when it receives a shutdown event or when every
//!   sender is gone
//! - The sync clock ends when its [`ShutdownSignal`] is triggered
//! - Both handles are joined by `Connection::close`
//!
//! Backend failures inside either thread are logged, never propagated.

use gitstore_core::{Event, EventKind, Result};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

// ============================================================================
// PendingCommits
// ============================================================================

/// Counter of events submitted but not yet handled by the commit loop
#[derive(Debug, Default)]
pub struct PendingCommits {
    count: Mutex<usize>,
    cond: Condvar,
}

impl PendingCommits {
    /// New counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// One more event in flight
    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    /// One event handled
    pub fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Events in flight
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until no event is in flight
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cond.wait(&mut count);
        }
    }
}

// ============================================================================
// ShutdownSignal
// ============================================================================

/// Idempotent, awaitable stop flag
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    /// Untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger; later calls do nothing
    pub fn trigger(&self) {
        let mut t = self.triggered.lock();
        if !*t {
            *t = true;
            self.cond.notify_all();
        }
    }

    /// Whether [`ShutdownSignal::trigger`] was called
    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Wait up to `timeout`; returns true if triggered
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut t = self.triggered.lock();
        if !*t {
            self.cond.wait_for(&mut t, timeout);
        }
        *t
    }

    /// Block until triggered
    pub fn wait(&self) {
        let mut t = self.triggered.lock();
        while !*t {
            self.cond.wait(&mut t);
        }
    }
}

// ============================================================================
// Commit loop
// ============================================================================

/// Start the commit loop.
///
/// `commit` is called for every event whose [`Event::wants_commit`] is true.
/// Every write and delete event settles one [`PendingCommits`] slot,
/// committed or not.
pub fn spawn_commit_loop<F>(
    events: Receiver<Event>,
    pending: Arc<PendingCommits>,
    commit: F,
) -> io::Result<JoinHandle<()>>
where
    F: Fn(&Event) -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name("gitstore-commit".to_string())
        .spawn(move || {
            for event in events {
                match event.kind {
                    EventKind::Shutdown => {
                        debug!(target: "gitstore::commit", "Commit loop shutting down");
                        break;
                    }
                    EventKind::Write | EventKind::Delete => {
                        if event.wants_commit() {
                            if let Err(e) = commit(&event) {
                                warn!(
                                    target: "gitstore::commit",
                                    path = %event.path,
                                    error = %e,
                                    "Commit failed"
                                );
                            }
                        }
                        pending.done();
                    }
                    EventKind::WriteBefore | EventKind::Read => {
                        trace!(target: "gitstore::commit", kind = %event.kind, path = %event.path, "Event");
                    }
                }
            }
        })
}

// ============================================================================
// Sync clock
// ============================================================================

/// Start the sync clock.
///
/// `tick` runs every `interval` until `shutdown` is triggered or `tick`
/// returns false.
pub fn spawn_sync_clock<F>(
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
    tick: F,
) -> io::Result<JoinHandle<()>>
where
    F: Fn() -> bool + Send + 'static,
{
    thread::Builder::new()
        .name("gitstore-sync".to_string())
        .spawn(move || {
            debug!(target: "gitstore::sync", interval = ?interval, "Sync clock started");
            while !shutdown.wait_timeout(interval) {
                if !tick() {
                    break;
                }
            }
            debug!(target: "gitstore::sync", "Sync clock stopped");
        })
}
