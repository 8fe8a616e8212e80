//! Schema migration
//!
//! [`Connection::migrate`] moves every record of one model type to another:
//! each record is decoded as the new type, given a fresh id and inserted,
//! then the migrated keys are removed from their old blocks.
//!
//! Migration is not atomic. If it stops half way, old and new records exist
//! side by side and running it again migrates the remaining old records.

use crate::connection::Connection;
use crate::model::Model;
use gitstore_core::{Error, Event, RecordId, Result};
use gitstore_storage::Block;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use tracing::{info, warn};

impl Connection {
    /// Re-insert every `Old` record as `New` and drop the originals.
    ///
    /// Returns the number of migrated records; a dataset without records
    /// migrates nothing.
    pub fn migrate<Old: Model, New: Model>(&self) -> Result<usize> {
        self.ensure_open()?;
        let records = match self.fetch_raw(Old::DATASET) {
            Ok(r) => r,
            Err(Error::NoRecords(_)) => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut obsolete: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        let mut created = HashSet::new();
        for record in &records {
            let old_id = RecordId::parse(record.id())?;
            let mut model: New = match record.hydrate() {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "gitstore::db", id = record.id(), error = %e, "Record not migrated");
                    continue;
                }
            };
            model.metadata_mut().id.clear();
            self.insert(&mut model)?;
            created.insert(model.id().to_string());
            obsolete.entry(old_id.block.clone()).or_default().push(old_id);
        }

        let migrated = created.len();
        let autocommit = self.autocommit();
        {
            let _writer = self.gate.writer();
            for (block_name, ids) in obsolete {
                let path = self.layout.block_file(Old::DATASET, &block_name);
                let rel = self.layout.relative_to_data(&path);
                let _w = self.write_mu.lock();
                let mut block = match self.blocks.remove(&path) {
                    Some((_, b)) => b,
                    None => Block::load(&path, self.key.as_deref()),
                };
                if block.is_corrupt() {
                    warn!(target: "gitstore::db", path = ?path, "Corrupt block left in place");
                    continue;
                }
                for id in &ids {
                    let full = id.to_string();
                    if created.contains(&full) {
                        continue;
                    }
                    if block.delete(&id.record) {
                        self.indexes.remove(Old::DATASET, &full)?;
                    }
                }

                if block.is_empty() {
                    match fs::remove_file(&path) {
                        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                    self.emit(Event::delete(
                        rel,
                        format!("Migrating {}/{block_name} to {}", Old::DATASET, New::DATASET),
                        autocommit,
                    ));
                } else {
                    block.write()?;
                    self.indexes.update_indexes(&block, Some(&self.registry));
                    self.blocks.insert(path, block);
                    self.emit(Event::write(
                        rel,
                        format!("Migrating {}/{block_name} to {}", Old::DATASET, New::DATASET),
                        autocommit,
                    ));
                }
            }
        }
        if let Err(e) = self.indexes.flush() {
            warn!(target: "gitstore::index", error = %e, "Index flush after migration failed");
        }
        if autocommit {
            self.pending.wait();
        }
        info!(
            target: "gitstore::db",
            from = Old::DATASET,
            to = New::DATASET,
            records = migrated,
            "Migration finished"
        );
        Ok(migrated)
    }
}
