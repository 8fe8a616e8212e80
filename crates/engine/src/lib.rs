//! Store engine for gitstore
//!
//! This crate orchestrates all lower layers:
//! - Connection: open/close, process lock, repository boot
//! - Write pipeline: insert, delete, staging queue, lock markers
//! - Read path: get, fetch, search
//! - Commit loop and sync clock
//! - Transactions and schema migration
//!
//! The engine is the only component that knows about:
//! - Model types and how they map onto datasets, blocks and keys
//! - Cross-layer coordination (blocks + indexes + backend commits)
//! - When the working tree is synced with the remote

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod lock;
mod migration;
pub mod model;
pub mod power;
pub mod queue;
mod read;
pub mod transaction;
pub mod write;

pub use config::{Config, CONFIG_FILE_NAME};
pub use connection::{Connection, ConnectionManager, OpenOptions};
pub use coordinator::{PendingCommits, ShutdownSignal};
pub use lock::AdvisoryLock;
pub use model::{BlockKey, Metadata, Model, ModelRegistry, RecordKey, RolloverPolicy};
pub use power::{has_sufficient_power, MainsPower, PowerMonitor, SysfsBattery};
pub use transaction::Transaction;
pub use write::MAX_INSERT_MANY;

pub use gitstore_core::{Error, Record, RecordId, Result};
pub use gitstore_durability::{Backend, BackendConfig, BackendKind, Notifier, User};
pub use gitstore_storage::{Dataset, DatasetStats, SearchMode, SearchParam};
