//! Read path
//!
//! `get` looks a record up in this order:
//!
//! 1. the block cache
//! 2. the record's indexed byte range (positional load)
//! 3. a full load of its block, which is then cached
//! 4. the staging queue
//!
//! `fetch` and `search` skip records that fail to decode and log them.

use crate::connection::Connection;
use crate::model::Model;
use gitstore_core::{Error, Record, RecordId, Result};
use gitstore_storage::{Block, Dataset, SearchMode, SearchParam};
use std::path::Path;
use tracing::warn;

impl Connection {
    /// Load and decode one record
    pub fn get<M: Model>(&self, id: &str) -> Result<M> {
        self.get_raw(id)?.hydrate::<M>()
    }

    /// Load one record without decoding it
    pub fn get_raw(&self, id: &str) -> Result<Record> {
        self.ensure_open()?;
        let rid = RecordId::parse(id)?;
        let path = self.layout.block_file(&rid.dataset, &rid.block);
        self.emit_read(self.layout.relative_to_data(&path), format!("Reading {id}"));

        if let Some(block) = self.blocks.get(&path) {
            if let Some(record) = block.get(&rid.record) {
                return Ok(record);
            }
        }

        self.indexes
            .ensure_dataset(&rid.dataset, self.key.as_deref(), Some(&self.registry))?;
        if let Some(pos) = self.indexes.locate(&rid) {
            if let Ok(block) = Block::load_by_positions(&path, self.key.as_deref(), &[pos]) {
                if let Some(record) = block.get(&rid.record) {
                    return Ok(record);
                }
            }
        }

        if let Some(record) = self.cached_block(&path, |b| b.get(&rid.record)) {
            return Ok(record);
        }

        if let Some(raw) = self.queue.staged(&rid)? {
            let mut record = Record::new(id, raw);
            record.decrypt(self.key.as_deref());
            return Ok(record);
        }
        Err(Error::RecordNotFound(id.to_string()))
    }

    /// Whether a record with this id exists
    pub fn exists(&self, id: &str) -> Result<bool> {
        match self.get_raw(id) {
            Ok(_) => Ok(true),
            Err(Error::RecordNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every record of `M`'s dataset, sorted by id.
    ///
    /// # Errors
    ///
    /// `NoRecords` if the dataset holds no records.
    pub fn fetch<M: Model>(&self) -> Result<Vec<M>> {
        Ok(hydrate_all(self.fetch_raw(M::DATASET)?))
    }

    /// Every record of `dataset`, undecoded, sorted by id
    pub fn fetch_raw(&self, dataset: &str) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let ds = Dataset::open(&self.layout, dataset, self.key.as_deref());
        let mut records = Vec::new();
        for path in ds.block_paths()? {
            if let Some(mut found) = self.cached_block(&path, |b| Some(b.records())) {
                records.append(&mut found);
            }
        }
        if records.is_empty() {
            return Err(Error::NoRecords(dataset.to_string()));
        }
        records.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(records)
    }

    /// Records of `M` whose indexed fields match any of `params`
    pub fn search<M: Model>(&self, params: &[SearchParam], mode: SearchMode) -> Result<Vec<M>> {
        Ok(hydrate_all(self.search_raw(M::DATASET, params, mode)?))
    }

    /// Records of `dataset` whose indexed fields match any of `params`,
    /// undecoded, sorted by id
    pub fn search_raw(
        &self,
        dataset: &str,
        params: &[SearchParam],
        mode: SearchMode,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        self.indexes
            .ensure_dataset(dataset, self.key.as_deref(), Some(&self.registry))?;
        self.indexes
            .search(dataset, params, mode, self.key.as_deref())
    }

    /// Run `f` on the cached block at `path`, loading and caching it first.
    ///
    /// Corrupt blocks are read but never cached.
    fn cached_block<T>(&self, path: &Path, f: impl FnOnce(&Block) -> Option<T>) -> Option<T> {
        if let Some(block) = self.blocks.get(path) {
            return f(&block);
        }
        let _w = self.write_mu.lock();
        if let Some(block) = self.blocks.get(path) {
            return f(&block);
        }
        let block = Block::load(path, self.key.as_deref());
        let out = f(&block);
        if !block.is_corrupt() && path.exists() {
            self.blocks.insert(path.to_path_buf(), block);
        }
        out
    }
}

fn hydrate_all<M: Model>(records: Vec<Record>) -> Vec<M> {
    records
        .into_iter()
        .filter_map(|r| match r.hydrate::<M>() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(target: "gitstore::db", id = r.id(), error = %e, "Skipping bad record");
                None
            }
        })
        .collect()
}
