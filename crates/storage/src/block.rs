//! Block files
//!
//! A block is a JSON object mapping record-local ids to raw payload strings.
//! Blocks are always written in a canonical line-oriented form:
//!
//! ```text
//! {
//! 	"0": "{\"Version\":\"v2\",...}",
//! 	"1": "..."
//! }
//! ```
//!
//! Keys are sorted and every entry sits on its own line, so each record has a
//! stable byte range. Those ranges are stored in the index and let
//! [`Block::load_by_positions`] read single records without parsing the whole
//! file.
//!
//! # Corruption
//!
//! [`Block::load`] never fails. A file that is not a JSON object of strings
//! yields an empty block flagged as corrupt, and [`Block::write`] refuses to
//! overwrite it.

use gitstore_core::{Error, Record, Result, ID_SEPARATOR};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Byte range `(offset, len)` of one entry inside a block file
pub type Position = (u64, u64);

/// In-memory view of one block file
#[derive(Debug, Clone)]
pub struct Block {
    path: PathBuf,
    dataset: String,
    name: String,
    key: Option<Vec<u8>>,
    entries: BTreeMap<String, String>,
    positions: HashMap<String, Position>,
    size: u64,
    corrupt: bool,
    partial: bool,
}

impl Block {
    /// An empty block that will be written to `path`
    pub fn empty(path: &Path, key: Option<&[u8]>) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dataset = path
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            dataset,
            name,
            key: key.map(<[u8]>::to_vec),
            entries: BTreeMap::new(),
            positions: HashMap::new(),
            size: 0,
            corrupt: false,
            partial: false,
        }
    }

    /// Load a whole block file.
    ///
    /// A missing file gives an empty block. Unreadable or malformed files
    /// give an empty block with [`Block::is_corrupt`] set.
    pub fn load(path: &Path, key: Option<&[u8]>) -> Self {
        let mut block = Self::empty(path, key);
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return block,
            Err(e) => {
                warn!(target: "gitstore::db", path = ?path, error = %e, "Unreadable block");
                block.corrupt = true;
                return block;
            }
        };
        block.size = content.len() as u64;
        if content.trim().is_empty() {
            return block;
        }
        match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(entries) => {
                block.entries = entries;
                block.positions = scan_positions(&content);
            }
            Err(e) => {
                warn!(target: "gitstore::db", path = ?path, error = %e, "Bad block");
                block.corrupt = true;
            }
        }
        block
    }

    /// Load only the entries at the given byte ranges.
    ///
    /// The result is partial and cannot be written back.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `BadBlock` if a range does not hold a
    /// complete entry.
    pub fn load_by_positions(path: &Path, key: Option<&[u8]>, ranges: &[Position]) -> Result<Self> {
        let bad = || Error::BadBlock(path.to_path_buf());
        let mut file = File::open(path)?;
        let mut block = Self::empty(path, key);
        for &(offset, len) in ranges {
            if len == 0 {
                return Err(bad());
            }
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf)?;
            let text = String::from_utf8(buf).map_err(|_| bad())?;
            let entry = format!("{{{}}}", text.trim().trim_end_matches(','));
            let parsed: BTreeMap<String, String> =
                serde_json::from_str(&entry).map_err(|_| bad())?;
            for (k, raw) in parsed {
                block.positions.insert(k.clone(), (offset, len));
                block.entries.insert(k, raw);
            }
        }
        block.partial = true;
        Ok(block)
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block name (file stem)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning dataset name
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Full record id for a record-local key
    pub fn record_id(&self, key: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.dataset,
            self.name,
            key,
            sep = ID_SEPARATOR
        )
    }

    /// File failed to parse on load
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Loaded from byte ranges only
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Size in bytes as last read or written
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the block holds no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record-local keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Byte range of `key` in the file as last read or written
    pub fn position(&self, key: &str) -> Option<Position> {
        self.positions.get(key).copied()
    }

    /// Insert or replace a raw (stored form) payload
    pub fn add(&mut self, key: impl Into<String>, raw: impl Into<String>) {
        let key = key.into();
        self.positions.remove(&key);
        self.entries.insert(key, raw.into());
    }

    /// Stored form of `key`
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Decrypted record for `key`
    pub fn get(&self, key: &str) -> Option<Record> {
        self.entries.get(key).map(|raw| self.make_record(key, raw))
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&mut self, key: &str) -> bool {
        self.positions.remove(key);
        self.entries.remove(key).is_some()
    }

    /// All records, decrypted, ascending by id
    pub fn records(&self) -> Vec<Record> {
        self.entries
            .iter()
            .map(|(k, raw)| self.make_record(k, raw))
            .collect()
    }

    /// Records matching `pred`, ascending by id
    pub fn filter(&self, mut pred: impl FnMut(&Record) -> bool) -> Vec<Record> {
        self.records().into_iter().filter(|r| pred(r)).collect()
    }

    /// Ids of records whose payload does not decode
    pub fn bad_records(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.envelope().is_err())
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Canonical file content plus the byte range of every entry
    pub fn serialize(&self) -> Result<(String, HashMap<String, Position>)> {
        if self.entries.is_empty() {
            return Ok(("{}\n".to_string(), HashMap::new()));
        }
        let mut out = String::from("{\n");
        let mut positions = HashMap::with_capacity(self.entries.len());
        let last = self.entries.len() - 1;
        for (i, (k, raw)) in self.entries.iter().enumerate() {
            out.push('\t');
            let line = format!(
                "{}: {}",
                serde_json::to_string(k)?,
                serde_json::to_string(raw)?
            );
            positions.insert(k.clone(), (out.len() as u64, line.len() as u64));
            out.push_str(&line);
            if i != last {
                out.push(',');
            }
            out.push('\n');
        }
        out.push_str("}\n");
        Ok((out, positions))
    }

    /// Persist the whole block.
    ///
    /// # Errors
    ///
    /// `BadBlock` if the block was corrupt on load or loaded partially.
    pub fn write(&mut self) -> Result<()> {
        if self.corrupt || self.partial {
            return Err(Error::BadBlock(self.path.clone()));
        }
        let (content, positions) = self.serialize()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, &content)?;
        self.size = content.len() as u64;
        self.positions = positions;
        Ok(())
    }

    fn make_record(&self, key: &str, raw: &str) -> Record {
        let mut record = Record::new(self.record_id(key), raw);
        record.decrypt(self.key.as_deref());
        record
    }
}

/// Byte range of every single-line entry in `content`
fn scan_positions(content: &str) -> HashMap<String, Position> {
    let mut positions = HashMap::new();
    let mut offset = 0usize;
    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(|c| c == '\n' || c == '\r');
        let lead = body.len() - body.trim_start().len();
        let candidate = body.trim().trim_end_matches(',');
        if candidate.starts_with('"') {
            if let Ok(map) =
                serde_json::from_str::<BTreeMap<String, String>>(&format!("{{{candidate}}}"))
            {
                if let Some(k) = map.into_keys().next() {
                    positions.insert(k, ((offset + lead) as u64, candidate.len() as u64));
                }
            }
        }
        offset += line.len();
    }
    positions
}
