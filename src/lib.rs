//! gitstore - embedded JSON document store replicated through git
//!
//! Records are JSON documents grouped into block files under per-type
//! dataset directories. Every write is committed to a git working tree and a
//! background clock pulls and pushes it to an online remote.
//!
//! # Quick Start
//!
//! ```ignore
//! use gitstore::{BlockKey, Config, ConnectionManager, Metadata, Model, SearchMode, SearchParam};
//!
//! let manager = ConnectionManager::new();
//! let conn = manager.open(Config::new("./db"))?;
//!
//! let mut msg = Message::new("a@x.com");
//! conn.insert(&mut msg)?;
//!
//! let found: Vec<Message> =
//!     conn.search(&[SearchParam::new("From", "a@x.com")], SearchMode::Equals)?;
//! conn.close()?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `gitstore-core` | errors, record ids, envelopes, encryption, events |
//! | `gitstore-storage` | layout, block files, datasets, indexes |
//! | `gitstore-durability` | git backend and repository boot |
//! | `gitstore-engine` | connections, write/read paths, sync, transactions |
//!
//! Everything needed by applications is re-exported here.

pub use gitstore_engine::*;

/// Lower layers, for tooling that works on store files directly
pub mod layers {
    pub use gitstore_core as core;
    pub use gitstore_durability as durability;
    pub use gitstore_storage as storage;
}
