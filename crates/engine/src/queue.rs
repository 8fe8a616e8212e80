//! Staging queue and id counters
//!
//! Records inserted while a sync round holds the advisory lock are staged in
//! `<root>/.<ns>/queue/<Dataset>.json` as `id -> raw` and written to their
//! blocks by the next direct write (or by close).
//!
//! # Flush
//!
//! A flush groups staged records by block. After each block is applied its
//! entries are dropped from the queue file, so a flush interrupted half way
//! re-applies at most one block. Applying is an id-keyed upsert, so that
//! repeat is harmless.

use gitstore_core::{RecordId, Result};
use gitstore_storage::{Layout, JSON_SUFFIX};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

type QueueFile = BTreeMap<String, String>;

/// Per-dataset staging files of one store
pub struct StagingQueue {
    layout: Layout,
    lock: Mutex<()>,
}

impl StagingQueue {
    /// Queue rooted at `layout`'s queue directory
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    /// Stage `raw` under the full record id
    pub fn stage(&self, id: &RecordId, raw: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.layout.queue_file(&id.dataset);
        let mut file = read_queue(&path)?;
        file.insert(id.to_string(), raw.to_string());
        write_queue(&path, &file)?;
        debug!(target: "gitstore::db", id = %id, "Record staged");
        Ok(())
    }

    /// Staged raw value of one record
    pub fn staged(&self, id: &RecordId) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        let mut file = read_queue(&self.layout.queue_file(&id.dataset))?;
        Ok(file.remove(&id.to_string()))
    }

    /// Number of records staged for `dataset`
    pub fn pending(&self, dataset: &str) -> Result<usize> {
        let _guard = self.lock.lock();
        Ok(read_queue(&self.layout.queue_file(dataset))?.len())
    }

    /// Staged records of `dataset` grouped by block, as record key and
    /// stored byte length
    pub fn staged_blocks(&self, dataset: &str) -> Result<BTreeMap<String, Vec<(String, usize)>>> {
        let _guard = self.lock.lock();
        let mut blocks: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
        for (id, raw) in read_queue(&self.layout.queue_file(dataset))? {
            if let Ok(rid) = RecordId::parse(&id) {
                blocks.entry(rid.block).or_default().push((rid.record, raw.len()));
            }
        }
        Ok(blocks)
    }

    /// Datasets with a queue file
    pub fn datasets(&self) -> Result<Vec<String>> {
        let rd = match fs::read_dir(self.layout.queue_dir()) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in rd {
            let p = entry?.path();
            if p.extension().map_or(false, |e| e == JSON_SUFFIX) {
                if let Some(stem) = p.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Apply the staged records of `dataset` block by block.
    ///
    /// `apply` receives the block name and that block's records. Returns the
    /// number of records applied. On error the failing block and every block
    /// after it stay staged.
    pub fn flush<F>(&self, dataset: &str, mut apply: F) -> Result<usize>
    where
        F: FnMut(&str, Vec<(RecordId, String)>) -> Result<()>,
    {
        let _guard = self.lock.lock();
        let path = self.layout.queue_file(dataset);
        let mut file = read_queue(&path)?;
        if file.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<String, Vec<(RecordId, String)>> = BTreeMap::new();
        for (id, raw) in &file {
            match RecordId::parse(id) {
                Ok(rid) => groups
                    .entry(rid.block.clone())
                    .or_default()
                    .push((rid, raw.clone())),
                Err(e) => warn!(target: "gitstore::db", id = %id, error = %e, "Dropping staged record"),
            }
        }

        let before = file.len();
        file.retain(|id, _| RecordId::parse(id).is_ok());
        if file.len() != before {
            write_queue(&path, &file)?;
        }

        let mut applied = 0;
        for (block, records) in groups {
            let ids: Vec<String> = records.iter().map(|(rid, _)| rid.to_string()).collect();
            applied += records.len();
            apply(&block, records)?;
            for id in ids {
                file.remove(&id);
            }
            write_queue(&path, &file)?;
        }
        debug!(target: "gitstore::db", dataset, applied, "Queue flushed");
        Ok(applied)
    }
}

fn read_queue(path: &Path) -> Result<QueueFile> {
    match fs::read_to_string(path) {
        Ok(s) if s.trim().is_empty() => Ok(QueueFile::new()),
        Ok(s) => Ok(serde_json::from_str(&s)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(QueueFile::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_queue(path: &Path, file: &QueueFile) -> Result<()> {
    if file.is_empty() {
        return match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        };
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(file)?)?;
    Ok(())
}

// ============================================================================
// IdCounter
// ============================================================================

/// Last-assigned numeric id per dataset
pub struct IdCounter {
    layout: Layout,
    lock: Mutex<()>,
}

impl IdCounter {
    /// Counters under `layout`'s id directory
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    /// Last assigned id, if any
    pub fn last(&self, dataset: &str) -> Result<Option<u64>> {
        let _guard = self.lock.lock();
        self.read(dataset)
    }

    /// Assign and persist the next id; the first id of a dataset is 0
    pub fn next(&self, dataset: &str) -> Result<u64> {
        let _guard = self.lock.lock();
        let next = self.read(dataset)?.map_or(0, |n| n + 1);
        self.write(dataset, next)?;
        Ok(next)
    }

    /// Record that `value` is in use; the counter never moves backwards
    pub fn advance(&self, dataset: &str, value: u64) -> Result<()> {
        let _guard = self.lock.lock();
        if self.read(dataset)?.map_or(true, |n| value > n) {
            self.write(dataset, value)?;
        }
        Ok(())
    }

    fn read(&self, dataset: &str) -> Result<Option<u64>> {
        let path = self.layout.id_file(dataset);
        match fs::read_to_string(&path) {
            Ok(s) => match s.trim().parse::<u64>() {
                Ok(n) => Ok(Some(n)),
                Err(_) => {
                    warn!(target: "gitstore::db", path = ?path, "Bad id counter, restarting at 0");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, dataset: &str, value: u64) -> Result<()> {
        let path = self.layout.id_file(dataset);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, value.to_string())?;
        Ok(())
    }
}
