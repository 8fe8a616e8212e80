//! Transactions
//!
//! A transaction is an ordered list of operations run on the caller's thread.
//! While it runs, writes do not request commits. On success a single commit
//! covering the whole tree is made; on the first failure the working tree is
//! reverted with the backend's undo and the remaining operations are skipped.
//!
//! Transactions nest: only the outermost one commits. A running transaction
//! counts as a writer on the advisory lock, so no sync round starts until its
//! commit is done; calling `sync` from inside one of its operations fails.
//!
//! ```ignore
//! let mut txn = conn.start_transaction("Move message")?;
//! txn.add_operation(|| conn.insert(&mut copy));
//! txn.add_operation(|| conn.delete(&old_id));
//! txn.commit()?;
//! ```

use crate::connection::Connection;
use gitstore_core::{Event, Result};
use std::fmt;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{error, info, warn};

type Operation<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// A named batch of operations
pub struct Transaction<'a> {
    conn: &'a Connection,
    name: String,
    operations: Vec<Operation<'a>>,
}

impl Connection {
    /// Begin collecting operations under `name`
    pub fn start_transaction(&self, name: impl Into<String>) -> Result<Transaction<'_>> {
        self.ensure_open()?;
        Ok(Transaction {
            conn: self,
            name: name.into(),
            operations: Vec::new(),
        })
    }

    /// Revert the working tree and reload in-memory state from it
    fn rollback(&self) {
        if let Err(e) = self.repo.undo() {
            error!(target: "gitstore::txn", error = %e, "Undo failed");
        }
        self.blocks.clear();
        self.indexes.clear();
        let rebuilt = self
            .indexes
            .build_index(self.key.as_deref(), Some(&self.registry))
            .and_then(|_| self.indexes.flush());
        if let Err(e) = rebuilt {
            error!(target: "gitstore::txn", error = %e, "Index rebuild after undo failed");
        }
    }
}

impl<'a> Transaction<'a> {
    /// Append an operation
    pub fn add_operation(&mut self, op: impl FnOnce() -> Result<()> + 'a) -> &mut Self {
        self.operations.push(Box::new(op));
        self
    }

    /// Transaction name, used in the commit message
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True without operations
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Run every operation in order.
    ///
    /// # Errors
    ///
    /// The error of the first failing operation, after the working tree has
    /// been reverted.
    pub fn commit(self) -> Result<()> {
        let conn = self.conn;
        conn.ensure_open()?;
        let _txn = conn.txn_lock.lock();
        // Held until the final commit is done; sync rounds wait for it
        let _writer = conn.gate.writer();
        let outermost = conn.txn_depth.load(Ordering::SeqCst) == 0;
        if outermost {
            conn.pending.wait();
            *conn.txn_owner.lock() = Some(thread::current().id());
        }
        conn.txn_depth.fetch_add(1, Ordering::SeqCst);
        info!(target: "gitstore::txn", name = %self.name, operations = self.operations.len(), "Transaction started");

        for (i, op) in self.operations.into_iter().enumerate() {
            if let Err(e) = op() {
                conn.txn_depth.fetch_sub(1, Ordering::SeqCst);
                if outermost {
                    *conn.txn_owner.lock() = None;
                }
                warn!(
                    target: "gitstore::txn",
                    name = %self.name,
                    operation = i,
                    error = %e,
                    "Transaction failed, rolling back"
                );
                conn.rollback();
                return Err(e);
            }
        }

        if conn.txn_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            conn.emit(Event::write(
                ".",
                format!("Committing transaction: {}", self.name),
                true,
            ));
            conn.pending.wait();
            *conn.txn_owner.lock() = None;
        }
        info!(target: "gitstore::txn", name = %self.name, "Transaction committed");
        Ok(())
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("operations", &self.operations.len())
            .finish()
    }
}
