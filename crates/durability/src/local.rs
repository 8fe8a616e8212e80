//! Backend without version control
//!
//! Keeps data in a plain directory. Commits and undo do nothing, so a failed
//! transaction cannot be reverted on this backend.

use crate::backend::{Backend, BackendConfig};
use crate::user::User;
use chrono::{DateTime, FixedOffset};
use gitstore_core::{Error, Result};
use std::fs;

/// Plain-directory backend
#[derive(Debug, Clone)]
pub struct LocalBackend {
    config: BackendConfig,
}

impl LocalBackend {
    /// Backend for `config.data_dir`
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.config.data_dir)?;
        Ok(())
    }

    fn clone_remote(&self) -> Result<()> {
        Err(Error::backend("local backend cannot clone"))
    }

    fn add_remote(&self) -> Result<()> {
        Ok(())
    }

    fn pull(&self) -> Result<()> {
        Err(Error::backend("local backend has no remote"))
    }

    fn push(&self) -> Result<()> {
        Err(Error::backend("local backend has no remote"))
    }

    fn commit(&self, _path: &str, _message: &str, _user: &User) -> Result<()> {
        Ok(())
    }

    fn undo(&self) -> Result<()> {
        Ok(())
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn last_commit_time(&self) -> Result<DateTime<FixedOffset>> {
        Err(Error::backend("local backend has no commit history"))
    }

    fn is_repository(&self) -> bool {
        self.config.data_dir.is_dir()
    }

    fn has_remote(&self) -> bool {
        true
    }
}
