//! Dataset directories
//!
//! A dataset is a directory under `data/` holding the block files of one
//! entity type. Listings are recomputed on every call; record, size and
//! corruption statistics are computed once per [`Dataset`] value by loading
//! every block.

use crate::block::Block;
use crate::layout::{Layout, JSON_SUFFIX};
use chrono::{DateTime, Utc};
use gitstore_core::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Aggregate statistics over every block of a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetStats {
    /// Total records
    pub records: usize,
    /// Total bytes of block files
    pub size: u64,
    /// Block files that failed to parse
    pub bad_blocks: Vec<PathBuf>,
    /// Ids of records that failed to decode
    pub bad_records: Vec<String>,
}

/// One dataset directory
#[derive(Debug)]
pub struct Dataset {
    name: String,
    path: PathBuf,
    index_dir: PathBuf,
    key: Option<Vec<u8>>,
    stats: OnceLock<DatasetStats>,
}

impl Dataset {
    /// Handle for dataset `name`; the directory need not exist
    pub fn open(layout: &Layout, name: &str, key: Option<&[u8]>) -> Self {
        Self {
            name: name.to_string(),
            path: layout.dataset_dir(name),
            index_dir: layout.dataset_index_dir(name),
            key: key.map(<[u8]>::to_vec),
            stats: OnceLock::new(),
        }
    }

    /// Every dataset under the data directory, sorted by name
    pub fn list(layout: &Layout, key: Option<&[u8]>) -> Result<Vec<Dataset>> {
        let names = list_entries(&layout.data_dir(), |p, name| {
            p.is_dir() && !name.starts_with('.')
        })?;
        Ok(names
            .into_iter()
            .map(|name| Dataset::open(layout, &name, key))
            .collect())
    }

    /// Dataset name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dataset directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block file paths, sorted
    pub fn block_paths(&self) -> Result<Vec<PathBuf>> {
        let names = list_entries(&self.path, |p, _| {
            p.is_file() && p.extension().map_or(false, |e| e == JSON_SUFFIX)
        })?;
        Ok(names.into_iter().map(|n| self.path.join(n)).collect())
    }

    /// Block names (file stems), sorted
    pub fn block_names(&self) -> Result<Vec<String>> {
        Ok(self
            .block_paths()?
            .iter()
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect())
    }

    /// Load every block
    pub fn blocks(&self) -> Result<Vec<Block>> {
        Ok(self
            .block_paths()?
            .iter()
            .map(|p| Block::load(p, self.key.as_deref()))
            .collect())
    }

    /// Number of block files
    pub fn block_count(&self) -> Result<usize> {
        Ok(self.block_paths()?.len())
    }

    /// Aggregate statistics, computed on first call
    pub fn stats(&self) -> &DatasetStats {
        self.stats.get_or_init(|| {
            let mut stats = DatasetStats::default();
            for block in self.blocks().unwrap_or_default() {
                stats.records += block.len();
                stats.size += block.size();
                if block.is_corrupt() {
                    stats.bad_blocks.push(block.path().to_path_buf());
                }
                stats.bad_records.extend(block.bad_records());
            }
            stats
        })
    }

    /// Total records
    pub fn record_count(&self) -> usize {
        self.stats().records
    }

    /// Total bytes
    pub fn size(&self) -> u64 {
        self.stats().size
    }

    /// Total bytes, human readable
    pub fn human_size(&self) -> String {
        format_bytes(self.size())
    }

    /// Corrupt block files
    pub fn bad_blocks(&self) -> &[PathBuf] {
        &self.stats().bad_blocks
    }

    /// Records that failed to decode
    pub fn bad_records(&self) -> &[String] {
        &self.stats().bad_records
    }

    /// Names of the index files built for this dataset
    pub fn indexes(&self) -> Result<Vec<String>> {
        let names = list_entries(&self.index_dir, |p, _| {
            p.is_file() && p.extension().map_or(false, |e| e == JSON_SUFFIX)
        })?;
        Ok(names
            .into_iter()
            .map(|n| n.trim_end_matches(&format!(".{JSON_SUFFIX}")).to_string())
            .collect())
    }

    /// Most recent modification time across block files
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.block_paths()
            .ok()?
            .iter()
            .filter_map(|p| fs::metadata(p).and_then(|m| m.modified()).ok())
            .max()
            .map(DateTime::<Utc>::from)
    }
}

/// Sorted names of entries in `dir` accepted by `keep`; missing dir is empty
fn list_entries(dir: &Path, keep: impl Fn(&Path, &str) -> bool) -> Result<Vec<String>> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in rd {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep(&entry.path(), &name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Render a byte count as B/KB/MB/GB/TB with one decimal, dropping `.0`.
///
/// The unit follows the number directly (`1.5KB`); zero renders as `0`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rendered = format!("{value:.1}");
    let rendered = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("{rendered}{}", UNITS[unit])
}
