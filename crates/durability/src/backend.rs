//! Version-control backend abstraction
//!
//! The data directory is a version-controlled working tree. This module
//! defines the `Backend` trait over the operations the engine needs. Two
//! variants implement it:
//!
//! - **GitBinary**: shells out to the `git` executable per call
//! - **Local**: plain directory, no history and no remote
//!
//! # Flow
//!
//! ```text
//! write path ──event──▶ commit loop ──▶ Backend::commit(path)
//! sync clock ─────────────────────────▶ Backend::pull + Backend::push
//! transaction failure ────────────────▶ Backend::undo
//! ```
//!
//! Backend calls block the calling thread and have no timeout.

use crate::user::User;
use chrono::{DateTime, FixedOffset};
use gitstore_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Remote name used for the online repository
pub const REMOTE_NAME: &str = "online";

/// Which backend implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `git` executable
    #[default]
    Git,
    /// No version control
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Git => f.write_str("git"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

/// Settings shared by every backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Working tree
    pub data_dir: PathBuf,
    /// Online remote URL, if syncing is enabled
    pub remote: Option<String>,
    /// Remote branch to pull from and push to
    pub branch: String,
    /// Private key used for transport auth
    pub ssh_key: Option<PathBuf>,
}

impl BackendConfig {
    /// Config for a local-only working tree
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote: None,
            branch: "master".to_string(),
            ssh_key: None,
        }
    }
}

/// Version-control operations on the data directory
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the commit loop, the sync thread
/// and caller threads all share one instance.
pub trait Backend: Send + Sync {
    /// Human-readable backend name for logging
    fn name(&self) -> &'static str;

    /// Create an empty working tree
    fn init(&self) -> Result<()>;

    /// Create the working tree by cloning the remote
    fn clone_remote(&self) -> Result<()>;

    /// Register the online remote; an existing registration is not an error
    fn add_remote(&self) -> Result<()>;

    /// Merge remote changes into the working tree
    fn pull(&self) -> Result<()>;

    /// Publish local commits
    fn push(&self) -> Result<()>;

    /// Commit everything under `path` (relative to the data dir, `.` for all)
    fn commit(&self, path: &str, message: &str, user: &User) -> Result<()>;

    /// Discard uncommitted changes and untracked files
    fn undo(&self) -> Result<()>;

    /// Data files that differ from the remote branch
    fn changed_files(&self) -> Result<Vec<String>>;

    /// Time of the most recent commit on the remote branch
    fn last_commit_time(&self) -> Result<DateTime<FixedOffset>>;

    /// Whether the data dir is already a working tree
    fn is_repository(&self) -> bool;

    /// Whether the online remote is already registered
    fn has_remote(&self) -> bool;
}
