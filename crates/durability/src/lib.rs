//! Durability layer for gitstore
//!
//! Data files become durable and replicated by committing them to a
//! version-controlled working tree and syncing that tree with a remote.
//!
//! - `Backend`: the version-control operations the engine relies on
//! - `GitBinary`: backend running the `git` executable
//! - `LocalBackend`: plain directory, no history
//! - `Repository`: boot, remote registration and commit serialization
//! - `User`: commit author

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod git;
pub mod local;
pub mod repository;
pub mod user;

pub use backend::{Backend, BackendConfig, BackendKind, REMOTE_NAME};
pub use git::GitBinary;
pub use local::LocalBackend;
pub use repository::{Boot, LogNotifier, Notifier, Repository};
pub use user::User;
