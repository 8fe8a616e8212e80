//! File-backed secondary indexes
//!
//! Every indexed field of a dataset has one JSON file mapping full record ids
//! to `{Value, Offset, Len}`. `Offset`/`Len` are the record's byte range in its
//! block file, so a search only reads the matching entries.
//!
//! # Cache
//!
//! Index files are cached in memory keyed by file path. Mutations mark the
//! file dirty; [`IndexManager::flush`] writes dirty files back. The cache sits
//! behind one mutex shared by foreground calls and the sync thread.
//!
//! # Consistency
//!
//! Index contents trail the data: they are refreshed on every write, purged on
//! delete, and rebuilt in full after a sync merges remote changes.

use crate::block::{Block, Position};
use crate::dataset::Dataset;
use crate::layout::{Layout, JSON_SUFFIX};
use gitstore_core::{Record, RecordId, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One record's entry in one field index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Indexed value
    #[serde(rename = "Value")]
    pub value: Value,
    /// Byte offset of the record in its block file
    #[serde(rename = "Offset")]
    pub offset: u64,
    /// Byte length of the record in its block file
    #[serde(rename = "Len")]
    pub len: u64,
}

impl IndexEntry {
    /// Byte range, if one was recorded
    pub fn position(&self) -> Option<Position> {
        (self.len > 0).then_some((self.offset, self.len))
    }
}

/// Contents of one index file
pub type IndexFile = BTreeMap<String, IndexEntry>;

/// How a search value is compared with indexed values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Whole value
    #[default]
    Equals,
    /// Substring
    Contains,
    /// Prefix
    StartsWith,
    /// Suffix
    EndsWith,
}

impl SearchMode {
    /// Case-insensitive comparison of `indexed` against `query`
    pub fn matches(&self, indexed: &Value, query: &str) -> bool {
        let hay = value_text(indexed).to_lowercase();
        let needle = query.to_lowercase();
        match self {
            SearchMode::Equals => hay == needle,
            SearchMode::Contains => hay.contains(&needle),
            SearchMode::StartsWith => hay.starts_with(&needle),
            SearchMode::EndsWith => hay.ends_with(&needle),
        }
    }
}

/// One `field = value` search term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParam {
    /// Index (field) name
    pub index: String,
    /// Value to compare with
    pub value: String,
}

impl SearchParam {
    /// Build a search term
    pub fn new(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            value: value.into(),
        }
    }
}

/// Source of index values for records stored without a v2 envelope
pub trait LegacyIndexes: Send + Sync {
    /// Index values for `record` of `dataset`, if the dataset's model is known
    fn indexes_for(&self, dataset: &str, record: &Record) -> Option<Map<String, Value>>;
}

/// String rendering used for matching
fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct IndexCache {
    files: HashMap<PathBuf, IndexFile>,
    dirty: HashSet<PathBuf>,
    ready: HashSet<String>,
}

impl IndexCache {
    fn file_mut(&mut self, path: &Path) -> &mut IndexFile {
        self.files
            .entry(path.to_path_buf())
            .or_insert_with(|| read_index_file(path))
    }

    /// Cached or on-disk index file; a missing file is not cached
    fn file(&mut self, path: &Path) -> Option<&IndexFile> {
        if !self.files.contains_key(path) {
            if !path.is_file() {
                return None;
            }
            self.files.insert(path.to_path_buf(), read_index_file(path));
        }
        self.files.get(path)
    }
}

/// In-memory cache of index files for one store root
pub struct IndexManager {
    layout: Layout,
    cache: Mutex<IndexCache>,
}

impl IndexManager {
    /// Manager for the index tree of `layout`
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            cache: Mutex::new(IndexCache::default()),
        }
    }

    /// Whether the index directory exists at all
    pub fn exists(&self) -> bool {
        self.layout.index_dir().is_dir()
    }

    /// Merge the index values of every record in `block`.
    ///
    /// Offsets are taken from the block's last write, so call this after
    /// [`Block::write`].
    pub fn update_indexes(&self, block: &Block, legacy: Option<&dyn LegacyIndexes>) {
        let mut cache = self.cache.lock();
        self.merge_block(&mut cache, block, legacy);
    }

    fn merge_block(&self, cache: &mut IndexCache, block: &Block, legacy: Option<&dyn LegacyIndexes>) {
        let dataset = block.dataset();
        let known = self.index_paths(cache, dataset).unwrap_or_else(|e| {
            warn!(target: "gitstore::index", dataset, error = %e, "Could not list index files");
            Vec::new()
        });
        for record in block.records() {
            let local = record.id().rsplit('/').next().unwrap_or_default().to_string();
            let (offset, len) = block.position(&local).unwrap_or((0, 0));
            let fields = match record.indexes() {
                m if !m.is_empty() => m.clone(),
                _ => legacy
                    .and_then(|l| l.indexes_for(dataset, &record))
                    .unwrap_or_default(),
            };
            let mut current = HashSet::with_capacity(fields.len());
            for (field, value) in fields {
                let path = self.layout.index_file(dataset, &field);
                cache.file_mut(&path).insert(
                    record.id().to_string(),
                    IndexEntry { value, offset, len },
                );
                cache.dirty.insert(path.clone());
                current.insert(path);
            }
            // Fields the record no longer carries
            for path in known.iter().filter(|p| !current.contains(*p)) {
                if cache.file_mut(path).remove(record.id()).is_some() {
                    cache.dirty.insert(path.clone());
                }
            }
        }
    }

    /// Drop `record_id` from every index of its dataset
    pub fn remove(&self, dataset: &str, record_id: &str) -> Result<()> {
        let mut cache = self.cache.lock();
        for path in self.index_paths(&cache, dataset)? {
            if cache.file_mut(&path).remove(record_id).is_some() {
                cache.dirty.insert(path);
            }
        }
        Ok(())
    }

    /// Write every dirty index file.
    ///
    /// Stops at the first failure; files not yet written stay dirty.
    pub fn flush(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        let mut dirty: Vec<PathBuf> = cache.dirty.iter().cloned().collect();
        dirty.sort();
        for path in dirty {
            let Some(file) = cache.files.get(&path) else {
                cache.dirty.remove(&path);
                continue;
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(file)?;
            fs::write(&path, json)?;
            cache.dirty.remove(&path);
        }
        Ok(())
    }

    /// Rebuild the indexes of every dataset from block contents
    pub fn build_index(&self, key: Option<&[u8]>, legacy: Option<&dyn LegacyIndexes>) -> Result<()> {
        let datasets = Dataset::list(&self.layout, key)?;
        let mut cache = self.cache.lock();
        cache.files.clear();
        cache.dirty.clear();
        cache.ready.clear();
        for ds in &datasets {
            self.rebuild_dataset(&mut cache, ds, legacy)?;
        }
        info!(target: "gitstore::index", datasets = datasets.len(), "Index rebuilt");
        Ok(())
    }

    /// Rebuild the indexes of one dataset
    pub fn build_index_targeted(
        &self,
        dataset: &str,
        key: Option<&[u8]>,
        legacy: Option<&dyn LegacyIndexes>,
    ) -> Result<()> {
        let ds = Dataset::open(&self.layout, dataset, key);
        let mut cache = self.cache.lock();
        self.rebuild_dataset(&mut cache, &ds, legacy)
    }

    /// Rebuild a dataset's indexes the first time it is touched
    pub fn ensure_dataset(
        &self,
        dataset: &str,
        key: Option<&[u8]>,
        legacy: Option<&dyn LegacyIndexes>,
    ) -> Result<()> {
        if self.cache.lock().ready.contains(dataset) {
            return Ok(());
        }
        self.build_index_targeted(dataset, key, legacy)
    }

    fn rebuild_dataset(
        &self,
        cache: &mut IndexCache,
        ds: &Dataset,
        legacy: Option<&dyn LegacyIndexes>,
    ) -> Result<()> {
        // Start every known index file empty so stale ids disappear
        for path in self.index_paths(cache, ds.name())? {
            cache.files.insert(path.clone(), IndexFile::new());
            cache.dirty.insert(path);
        }
        for block in ds.blocks()? {
            self.merge_block(cache, &block, legacy);
        }
        cache.ready.insert(ds.name().to_string());
        debug!(target: "gitstore::index", dataset = ds.name(), "Dataset index rebuilt");
        Ok(())
    }

    /// Find the records of `dataset` matching any of `params`.
    ///
    /// Only the matching byte ranges of each block are read; a block whose
    /// ranges are unknown or stale is loaded in full instead.
    pub fn search(
        &self,
        dataset: &str,
        params: &[SearchParam],
        mode: SearchMode,
        key: Option<&[u8]>,
    ) -> Result<Vec<Record>> {
        let mut hits: BTreeMap<String, Option<Position>> = BTreeMap::new();
        {
            let mut cache = self.cache.lock();
            for param in params {
                let path = self.layout.index_file(dataset, &param.index);
                let Some(file) = cache.file(&path) else {
                    continue;
                };
                for (id, entry) in file.iter() {
                    if mode.matches(&entry.value, &param.value) {
                        hits.insert(id.clone(), entry.position());
                    }
                }
            }
        }

        // Group by owning block
        let mut by_block: BTreeMap<String, Vec<(RecordId, Option<Position>)>> = BTreeMap::new();
        for (id, pos) in hits {
            match RecordId::parse(&id) {
                Ok(rid) => by_block.entry(rid.block.clone()).or_default().push((rid, pos)),
                Err(_) => warn!(target: "gitstore::index", id = %id, "Malformed id in index"),
            }
        }

        let mut records = Vec::new();
        for (block_name, wanted) in by_block {
            let path = self.layout.block_file(dataset, &block_name);
            let block = load_ranges(&path, key, &wanted);
            for (rid, _) in &wanted {
                if let Some(r) = block.get(&rid.record) {
                    records.push(r);
                }
            }
        }
        records.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(records)
    }

    /// Indexed byte range of a record, if any index holds one
    pub fn locate(&self, id: &RecordId) -> Option<Position> {
        let mut cache = self.cache.lock();
        let full = id.to_string();
        let paths = self.index_paths(&cache, &id.dataset).ok()?;
        paths
            .iter()
            .find_map(|p| cache.file_mut(p).get(&full).and_then(IndexEntry::position))
    }

    /// Snapshot of one index file
    pub fn entries(&self, dataset: &str, field: &str) -> IndexFile {
        let path = self.layout.index_file(dataset, field);
        self.cache.lock().file(&path).cloned().unwrap_or_default()
    }

    /// Drop all cached index files.
    ///
    /// Unflushed changes are lost.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.files.clear();
        cache.dirty.clear();
        cache.ready.clear();
    }

    /// Index files of `dataset`, on disk or only in the cache
    fn index_paths(&self, cache: &IndexCache, dataset: &str) -> Result<Vec<PathBuf>> {
        let dir = self.layout.dataset_index_dir(dataset);
        let mut paths: BTreeSet<PathBuf> = cache
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir.as_path()))
            .cloned()
            .collect();
        match fs::read_dir(&dir) {
            Ok(rd) => {
                for entry in rd {
                    let p = entry?.path();
                    if p.extension().map_or(false, |e| e == JSON_SUFFIX) {
                        paths.insert(p);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(paths.into_iter().collect())
    }
}

fn read_index_file(path: &Path) -> IndexFile {
    match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(target: "gitstore::index", path = ?path, error = %e, "Bad index file");
            IndexFile::new()
        }),
        Err(_) => IndexFile::new(),
    }
}

/// Load the wanted records of one block, positionally when possible
fn load_ranges(path: &Path, key: Option<&[u8]>, wanted: &[(RecordId, Option<Position>)]) -> Block {
    let ranges: Option<Vec<Position>> = wanted.iter().map(|(_, p)| *p).collect();
    if let Some(ranges) = ranges {
        if let Ok(block) = Block::load_by_positions(path, key, &ranges) {
            if wanted.iter().all(|(rid, _)| block.contains(&rid.record)) {
                return block;
            }
        }
        debug!(target: "gitstore::index", path = ?path, "Stale positions, loading full block");
    }
    Block::load(path, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstore_core::encode_v2;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload(from: &str) -> String {
        let mut idx = Map::new();
        idx.insert("From".into(), json!(from));
        encode_v2(&json!({ "From": from }), &idx).unwrap()
    }

    fn seeded(dir: &TempDir) -> (Layout, IndexManager) {
        let layout = Layout::new(dir.path(), "gitdb");
        let mut b0 = Block::empty(&layout.block_file("Message", "b0"), None);
        b0.add("0", payload("a@x.com"));
        b0.add("1", payload("A@X.com"));
        b0.add("2", payload("b@y.org"));
        b0.write().unwrap();
        let mut b1 = Block::empty(&layout.block_file("Message", "b1"), None);
        b1.add("3", payload("c@x.com"));
        b1.write().unwrap();

        let mgr = IndexManager::new(layout.clone());
        mgr.update_indexes(&b0, None);
        mgr.update_indexes(&b1, None);
        (layout, mgr)
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(Record::id).collect()
    }

    #[test]
    fn equals_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let (_, mgr) = seeded(&dir);
        let hits = mgr
            .search("Message", &[SearchParam::new("From", "a@x.com")], SearchMode::Equals, None)
            .unwrap();
        assert_eq!(ids(&hits), vec!["Message/b0/0", "Message/b0/1"]);
    }

    #[test]
    fn other_modes() {
        let dir = TempDir::new().unwrap();
        let (_, mgr) = seeded(&dir);
        let run = |mode, v: &str| {
            let hits = mgr
                .search("Message", &[SearchParam::new("From", v)], mode, None)
                .unwrap();
            ids(&hits).into_iter().map(str::to_string).collect::<Vec<_>>()
        };
        assert_eq!(run(SearchMode::Contains, "@x."), vec!["Message/b0/0", "Message/b0/1", "Message/b1/3"]);
        assert_eq!(run(SearchMode::StartsWith, "b@"), vec!["Message/b0/2"]);
        assert_eq!(run(SearchMode::EndsWith, ".ORG"), vec!["Message/b0/2"]);
    }

    #[test]
    fn params_are_unioned() {
        let dir = TempDir::new().unwrap();
        let (_, mgr) = seeded(&dir);
        let hits = mgr
            .search(
                "Message",
                &[SearchParam::new("From", "b@y.org"), SearchParam::new("From", "c@x.com")],
                SearchMode::Equals,
                None,
            )
            .unwrap();
        assert_eq!(ids(&hits), vec!["Message/b0/2", "Message/b1/3"]);
    }

    #[test]
    fn flush_writes_index_files() {
        let dir = TempDir::new().unwrap();
        let (layout, mgr) = seeded(&dir);
        mgr.flush().unwrap();
        let on_disk: IndexFile =
            serde_json::from_str(&fs::read_to_string(layout.index_file("Message", "From")).unwrap())
                .unwrap();
        assert_eq!(on_disk.len(), 4);
        assert!(on_disk["Message/b0/0"].len > 0);
    }

    #[test]
    fn remove_purges_every_index() {
        let dir = TempDir::new().unwrap();
        let (_, mgr) = seeded(&dir);
        mgr.remove("Message", "Message/b0/0").unwrap();
        assert!(!mgr.entries("Message", "From").contains_key("Message/b0/0"));
    }

    #[test]
    fn build_index_drops_stale_entries() {
        let dir = TempDir::new().unwrap();
        let (layout, mgr) = seeded(&dir);
        mgr.flush().unwrap();
        fs::remove_file(layout.block_file("Message", "b1")).unwrap();

        let fresh = IndexManager::new(layout.clone());
        fresh.build_index(None, None).unwrap();
        fresh.flush().unwrap();
        let entries = fresh.entries("Message", "From");
        assert_eq!(entries.len(), 3);
        assert!(!entries.contains_key("Message/b1/3"));
    }

    #[test]
    fn stale_positions_fall_back_to_full_load() {
        let dir = TempDir::new().unwrap();
        let (layout, mgr) = seeded(&dir);
        // Rewrite b0 with an extra leading entry so every offset shifts
        let mut b0 = Block::load(&layout.block_file("Message", "b0"), None);
        b0.add("00", payload("z@z.z"));
        b0.write().unwrap();
        let hits = mgr
            .search("Message", &[SearchParam::new("From", "b@y.org")], SearchMode::Equals, None)
            .unwrap();
        assert_eq!(ids(&hits), vec!["Message/b0/2"]);
    }

    #[test]
    fn locate_returns_position() {
        let dir = TempDir::new().unwrap();
        let (layout, mgr) = seeded(&dir);
        let b0 = Block::load(&layout.block_file("Message", "b0"), None);
        let id = RecordId::parse("Message/b0/1").unwrap();
        assert_eq!(mgr.locate(&id), b0.position("1"));
        assert_eq!(mgr.locate(&RecordId::parse("Message/b0/9").unwrap()), None);
    }

    struct FromField;

    impl LegacyIndexes for FromField {
        fn indexes_for(&self, _dataset: &str, record: &Record) -> Option<Map<String, Value>> {
            let v: Value = serde_json::from_str(record.data()).ok()?;
            let mut m = Map::new();
            m.insert("From".into(), v.get("From")?.clone());
            Some(m)
        }
    }

    #[test]
    fn legacy_records_use_registered_indexer() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "gitdb");
        let mut b = Block::empty(&layout.block_file("Message", "b0"), None);
        b.add("0", "{\"From\":\"old@x.com\"}");
        b.write().unwrap();

        let mgr = IndexManager::new(layout);
        mgr.update_indexes(&b, None);
        assert!(mgr.entries("Message", "From").is_empty());
        mgr.update_indexes(&b, Some(&FromField));
        assert_eq!(mgr.entries("Message", "From").len(), 1);
    }

    #[test]
    fn update_drops_fields_a_record_no_longer_carries() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "gitdb");
        let path = layout.block_file("Message", "b0");
        let mut idx = Map::new();
        idx.insert("From".into(), json!("a@x.com"));
        idx.insert("To".into(), json!("b@x.com"));
        let mut b = Block::empty(&path, None);
        b.add("0", encode_v2(&json!({ "From": "a@x.com", "To": "b@x.com" }), &idx).unwrap());
        b.write().unwrap();
        let mgr = IndexManager::new(layout.clone());
        mgr.update_indexes(&b, None);
        assert_eq!(mgr.entries("Message", "To").len(), 1);

        b.add("0", payload("a@x.com"));
        b.write().unwrap();
        mgr.update_indexes(&b, None);
        assert!(mgr.entries("Message", "To").is_empty());
        assert_eq!(mgr.entries("Message", "From").len(), 1);
        let hits = mgr
            .search("Message", &[SearchParam::new("To", "b@x.com")], SearchMode::Equals, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_on_unknown_field_creates_no_index_file() {
        let dir = TempDir::new().unwrap();
        let (layout, mgr) = seeded(&dir);
        let hits = mgr
            .search("Message", &[SearchParam::new("Subject", "x")], SearchMode::Contains, None)
            .unwrap();
        assert!(hits.is_empty());
        mgr.build_index_targeted("Message", None, None).unwrap();
        mgr.flush().unwrap();
        assert!(layout.index_file("Message", "From").exists());
        assert!(!layout.index_file("Message", "Subject").exists());
    }
}
