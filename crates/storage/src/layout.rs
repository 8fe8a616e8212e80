//! On-disk layout of a store root
//!
//! ```text
//! <root>/data/<Dataset>/<Block>.json              block file
//! <root>/data/<Dataset>/Lock/<name>                advisory lock marker
//! <root>/.<ns>/index/<Dataset>/<Field>.json       index file
//! <root>/.<ns>/queue/<Dataset>.json                write-staging file
//! <root>/.<ns>/id/<Dataset>                        last-assigned-id counter
//! <root>/.<ns>/.lock                               process lock
//! ```

use std::path::{Path, PathBuf};

/// File suffix of block, index and queue files
pub const JSON_SUFFIX: &str = "json";

/// Directory name holding lock markers inside a dataset
pub const LOCK_DIR: &str = "Lock";

/// Path helpers for one store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    namespace: String,
}

impl Layout {
    /// Layout for `root` using `.<namespace>` as the internal directory
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version-controlled data directory
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Internal bookkeeping directory, `.<ns>`
    pub fn internal_dir(&self) -> PathBuf {
        self.root.join(format!(".{}", self.namespace))
    }

    /// Root of all index files
    pub fn index_dir(&self) -> PathBuf {
        self.internal_dir().join("index")
    }

    /// Index directory of one dataset
    pub fn dataset_index_dir(&self, dataset: &str) -> PathBuf {
        self.index_dir().join(dataset)
    }

    /// Index file of one field
    pub fn index_file(&self, dataset: &str, field: &str) -> PathBuf {
        self.dataset_index_dir(dataset)
            .join(format!("{field}.{JSON_SUFFIX}"))
    }

    /// Directory of staging queue files
    pub fn queue_dir(&self) -> PathBuf {
        self.internal_dir().join("queue")
    }

    /// Staging queue file of one dataset
    pub fn queue_file(&self, dataset: &str) -> PathBuf {
        self.queue_dir().join(format!("{dataset}.{JSON_SUFFIX}"))
    }

    /// Directory of id counters
    pub fn id_dir(&self) -> PathBuf {
        self.internal_dir().join("id")
    }

    /// Last-assigned-id counter of one dataset
    pub fn id_file(&self, dataset: &str) -> PathBuf {
        self.id_dir().join(dataset)
    }

    /// Process lock file
    pub fn process_lock_file(&self) -> PathBuf {
        self.internal_dir().join(".lock")
    }

    /// Directory of one dataset
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.data_dir().join(dataset)
    }

    /// Block file
    pub fn block_file(&self, dataset: &str, block: &str) -> PathBuf {
        self.dataset_dir(dataset)
            .join(format!("{block}.{JSON_SUFFIX}"))
    }

    /// Lock marker directory of one dataset
    pub fn lock_dir(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset).join(LOCK_DIR)
    }

    /// One lock marker
    pub fn lock_marker(&self, dataset: &str, name: &str) -> PathBuf {
        self.lock_dir(dataset).join(name)
    }

    /// `path` relative to the data directory, `/`-separated, for commits
    pub fn relative_to_data(&self, path: &Path) -> String {
        let data = self.data_dir();
        match path.strip_prefix(&data) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}
