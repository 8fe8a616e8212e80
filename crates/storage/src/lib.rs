//! Storage layer for gitstore
//!
//! This crate owns everything that touches the data files directly:
//! - Layout: where blocks, indexes, queues, counters and locks live
//! - Block: one block file, full and positional (byte-range) loads
//! - Dataset: a directory of blocks plus aggregate statistics
//! - IndexManager: cached per-field index files, rebuild and search
//!
//! Nothing here talks to version control; the engine decides when files
//! are committed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod dataset;
pub mod index;
pub mod layout;

pub use block::{Block, Position};
pub use dataset::{format_bytes, Dataset, DatasetStats};
pub use index::{IndexEntry, IndexFile, IndexManager, LegacyIndexes, SearchMode, SearchParam};
pub use layout::{Layout, JSON_SUFFIX, LOCK_DIR};
