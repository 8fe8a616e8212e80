//! Write pipeline
//!
//! # Insert
//!
//! 1. Stamp `CreatedAt` (first insert only) and `UpdatedAt`
//! 2. Run the model's validation hook
//! 3. Freeze the id from the model's block and record keys
//! 4. Encode as a v2 envelope, encrypting if the model asks for it
//! 5. If a sync round holds the advisory lock, stage the record and return
//! 6. Otherwise flush the dataset's staging queue, then write the block,
//!    refresh its index entries and advance the id counter
//! 7. Emit the write event and, outside a transaction, wait for its commit
//!
//! The commit itself happens on the commit loop. Its failure is logged and
//! never reaches the caller.

use crate::connection::Connection;
use crate::lock::{create_markers, release_markers};
use crate::model::{BlockKey, Model, RecordKey, RolloverPolicy};
use chrono::Utc;
use gitstore_core::{crypto, encode_v2, Error, Event, RecordId, Result};
use gitstore_storage::{Block, Dataset};
use std::path::Path;
use tracing::{debug, info};

/// Upper bound of [`Connection::insert_many`]
pub const MAX_INSERT_MANY: usize = 100;

impl Connection {
    /// Store `model`, assigning its id on first insert.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` from the model hook, `InvalidId` for a malformed
    /// preset id, `InvalidInput` when the model asks for encryption without a
    /// configured key, `BadBlock` when the target block is corrupt.
    pub fn insert<M: Model>(&self, model: &mut M) -> Result<()> {
        self.ensure_open()?;
        let now = Utc::now();
        {
            let meta = model.metadata_mut();
            if meta.created_at.is_none() {
                meta.created_at = Some(now);
            }
            meta.updated_at = Some(now);
        }
        model.validate().map_err(|e| match e {
            Error::ValidationFailed(_) => e,
            other => Error::ValidationFailed(other.to_string()),
        })?;

        let (id, existed) = self.assign_id(model)?;
        let raw = self.encode(model)?;
        let verb = if existed { "Updating" } else { "Inserting" };
        let autocommit = self.autocommit();

        {
            let Some(_writer) = self.gate.try_writer() else {
                self.queue.stage(&id, &raw)?;
                info!(target: "gitstore::db", id = %id, "Sync running, record staged");
                return Ok(());
            };
            self.flush_queue(&id.dataset)?;
            self.write_record(&id, &raw, format!("{verb} {id}"), autocommit)?;
        }
        if autocommit {
            self.pending.wait();
        }
        Ok(())
    }

    /// Insert up to [`MAX_INSERT_MANY`] models as one transaction.
    ///
    /// Either every model is stored or the working tree is rolled back.
    pub fn insert_many<M: Model>(&self, models: &mut [M]) -> Result<()> {
        self.ensure_open()?;
        if models.len() > MAX_INSERT_MANY {
            return Err(Error::invalid_input(format!(
                "insert_many takes at most {MAX_INSERT_MANY} models, got {}",
                models.len()
            )));
        }
        let mut txn = self.start_transaction("InsertMany")?;
        for model in models.iter_mut() {
            txn.add_operation(move || self.insert(model));
        }
        txn.commit()
    }

    /// Remove a record; an absent record is not an error
    pub fn delete(&self, id: &str) -> Result<()> {
        self.remove_record(id, false)
    }

    /// Remove a record, failing with `RecordNotFound` if it is absent
    pub fn delete_or_fail(&self, id: &str) -> Result<()> {
        self.remove_record(id, true)
    }

    /// Next value of `M`'s id counter, persisted before it is returned
    pub fn generate_id<M: Model>(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.ids.next(M::DATASET)?.to_string())
    }

    /// Create the lock markers of `model`.
    ///
    /// # Errors
    ///
    /// `NotLockable` if the model names no markers, `LockAlreadyExists` if
    /// any marker is present. Markers created before the failure are removed.
    pub fn lock<M: Model>(&self, model: &M) -> Result<()> {
        self.ensure_open()?;
        let names = lock_names(model)?;
        let dir = self.layout.lock_dir(M::DATASET);
        let autocommit = self.autocommit();
        {
            let _writer = self.gate.writer();
            for name in &names {
                self.emit(Event::write_before(
                    self.layout.relative_to_data(&dir.join(name)),
                    format!("Creating lock file {name}"),
                ));
            }
            create_markers(&dir, &names)?;
            self.emit(Event::write(
                self.dataset_path(M::DATASET),
                format!("Created Lock Files for: {}", model.id()),
                autocommit,
            ));
        }
        if autocommit {
            self.pending.wait();
        }
        Ok(())
    }

    /// Remove the lock markers of `model`; absent markers are skipped
    pub fn unlock<M: Model>(&self, model: &M) -> Result<()> {
        self.ensure_open()?;
        let names = lock_names(model)?;
        let dir = self.layout.lock_dir(M::DATASET);
        let autocommit = self.autocommit();
        {
            let _writer = self.gate.writer();
            release_markers(&dir, &names)?;
            self.emit(Event::write(
                self.dataset_path(M::DATASET),
                format!("Removing Lock Files for: {}", model.id()),
                autocommit,
            ));
        }
        if autocommit {
            self.pending.wait();
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn assign_id<M: Model>(&self, model: &mut M) -> Result<(RecordId, bool)> {
        if !model.id().is_empty() {
            let id = RecordId::parse(model.id())?;
            if id.dataset != M::DATASET {
                return Err(Error::InvalidId(format!(
                    "{id} is not in dataset {}",
                    M::DATASET
                )));
            }
            return Ok((id, true));
        }

        let block = match model.block() {
            BlockKey::Named(name) => name,
            BlockKey::Rollover(policy) => self.rollover_block(M::DATASET, &policy)?,
        };
        let record = match model.record_key() {
            RecordKey::Named(key) => key,
            RecordKey::Next => self.ids.next(M::DATASET)?.to_string(),
        };
        let id = RecordId::parse(&format!("{}/{block}/{record}", M::DATASET))?;
        model.metadata_mut().id = id.to_string();
        Ok((id, false))
    }

    /// Highest numbered block, or the one after it once that block is full.
    /// Records staged in the queue count towards the block they will land in.
    fn rollover_block(&self, dataset: &str, policy: &RolloverPolicy) -> Result<String> {
        let ds = Dataset::open(&self.layout, dataset, self.key.as_deref());
        let staged = self.queue.staged_blocks(dataset)?;
        let latest = ds
            .block_names()?
            .iter()
            .chain(staged.keys())
            .filter_map(|n| n.strip_prefix('b')?.parse::<u64>().ok())
            .max();
        let Some(n) = latest else {
            return Ok("b0".to_string());
        };
        let name = format!("b{n}");
        let path = self.layout.block_file(dataset, &name);
        let (mut size, mut records, keys) = match self.blocks.get(&path) {
            Some(b) => (b.size(), b.len(), b.keys().map(str::to_string).collect::<Vec<_>>()),
            None => {
                let b = Block::load(&path, self.key.as_deref());
                (b.size(), b.len(), b.keys().map(str::to_string).collect())
            }
        };
        for (key, len) in staged.get(&name).into_iter().flatten() {
            // Tab, quotes, separator and line end around each entry
            size += (key.len() + len + 8) as u64;
            if !keys.iter().any(|k| k == key) {
                records += 1;
            }
        }
        let next = if policy.is_full(size, records) { n + 1 } else { n };
        Ok(format!("b{next}"))
    }

    fn encode<M: Model>(&self, model: &M) -> Result<String> {
        let data = serde_json::to_value(model)?;
        let raw = encode_v2(&data, &model.indexes())?;
        if !model.should_encrypt() {
            return Ok(raw);
        }
        let key = self.key.as_deref().ok_or_else(|| {
            Error::invalid_input(format!(
                "{} records are encrypted but no encryption_key is configured",
                M::DATASET
            ))
        })?;
        crypto::encrypt(key, &raw)
    }

    /// Write one encoded record straight into its block
    pub(crate) fn write_record(
        &self,
        id: &RecordId,
        raw: &str,
        message: String,
        autocommit: bool,
    ) -> Result<()> {
        self.indexes
            .ensure_dataset(&id.dataset, self.key.as_deref(), Some(&self.registry))?;
        let path = self.layout.block_file(&id.dataset, &id.block);
        let rel = self.layout.relative_to_data(&path);

        self.emit(Event::write_before(rel.clone(), message.clone()));
        self.update_block(&path, |block| block.add(id.record.clone(), raw))?;
        if let Ok(n) = id.record.parse::<u64>() {
            self.ids.advance(&id.dataset, n)?;
        }
        debug!(target: "gitstore::db", id = %id, "Record written");
        self.emit(Event::write(rel, message, autocommit));
        Ok(())
    }

    /// Mutate a block, persist it, and refresh its index entries.
    ///
    /// A block whose write fails is dropped from the cache.
    pub(crate) fn update_block<F>(&self, path: &Path, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Block),
    {
        let _w = self.write_mu.lock();
        let mut block = match self.blocks.remove(path) {
            Some((_, b)) => b,
            None => Block::load(path, self.key.as_deref()),
        };
        mutate(&mut block);
        block.write()?;
        self.indexes.update_indexes(&block, Some(&self.registry));
        self.blocks.insert(path.to_path_buf(), block);
        Ok(())
    }

    fn remove_record(&self, id: &str, must_exist: bool) -> Result<()> {
        self.ensure_open()?;
        let rid = RecordId::parse(id)?;
        let autocommit = self.autocommit();
        {
            let _writer = self.gate.writer();
            self.flush_queue(&rid.dataset)?;
            self.indexes
                .ensure_dataset(&rid.dataset, self.key.as_deref(), Some(&self.registry))?;
            let path = self.layout.block_file(&rid.dataset, &rid.block);

            let removed = {
                let _w = self.write_mu.lock();
                let mut block = match self.blocks.remove(&path) {
                    Some((_, b)) => b,
                    None => Block::load(&path, self.key.as_deref()),
                };
                if block.delete(&rid.record) {
                    block.write()?;
                    self.indexes.remove(&rid.dataset, id)?;
                    self.indexes.update_indexes(&block, Some(&self.registry));
                    self.blocks.insert(path.clone(), block);
                    true
                } else {
                    if !block.is_corrupt() {
                        self.blocks.insert(path.clone(), block);
                    }
                    false
                }
            };

            if !removed {
                if must_exist {
                    return Err(Error::RecordNotFound(id.to_string()));
                }
                debug!(target: "gitstore::db", id, "Nothing to delete");
                return Ok(());
            }
            self.emit(Event::delete(
                self.layout.relative_to_data(&path),
                format!("Deleting {id}"),
                autocommit,
            ));
        }
        if autocommit {
            self.pending.wait();
        }
        Ok(())
    }

    /// Apply the staged records of one dataset
    pub(crate) fn flush_queue(&self, dataset: &str) -> Result<usize> {
        let autocommit = self.autocommit();
        let applied = self.queue.flush(dataset, |block, records| {
            self.indexes
                .ensure_dataset(dataset, self.key.as_deref(), Some(&self.registry))?;
            let path = self.layout.block_file(dataset, block);
            self.update_block(&path, |b| {
                for (rid, raw) in &records {
                    b.add(rid.record.clone(), raw.clone());
                }
            })?;
            for (rid, _) in &records {
                if let Ok(n) = rid.record.parse::<u64>() {
                    self.ids.advance(dataset, n)?;
                }
            }
            self.emit(Event::write(
                self.layout.relative_to_data(&path),
                format!("Inserting {} queued records into {dataset}/{block}", records.len()),
                autocommit,
            ));
            Ok(())
        })?;
        if applied > 0 {
            info!(target: "gitstore::db", dataset, applied, "Staged records written");
        }
        Ok(applied)
    }

    /// Apply every staging queue
    pub(crate) fn flush_all_queues(&self) -> Result<()> {
        for dataset in self.queue.datasets()? {
            self.flush_queue(&dataset)?;
        }
        Ok(())
    }

    fn dataset_path(&self, dataset: &str) -> String {
        self.layout
            .relative_to_data(&self.layout.dataset_dir(dataset))
    }
}

fn lock_names<M: Model>(model: &M) -> Result<Vec<String>> {
    let names = model.lock_names();
    if names.is_empty() {
        return Err(Error::NotLockable(M::DATASET.to_string()));
    }
    Ok(names)
}
