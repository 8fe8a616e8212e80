//! Model schema and addressing
//!
//! Each stored type implements [`Model`] once. The trait tells the engine
//! which dataset the type lives in, how records are partitioned into blocks,
//! which key a record gets inside its block, and which fields are indexed.

use chrono::{DateTime, Utc};
use gitstore_core::{Record, Result};
use gitstore_storage::LegacyIndexes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Bookkeeping fields every model carries, serialized inline
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Message {
///     #[serde(flatten)]
///     meta: Metadata,
///     #[serde(rename = "From")]
///     from: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Full `Dataset/Block/Record` id; empty until first insert
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Set on first insert
    #[serde(rename = "CreatedAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set on every insert
    #[serde(rename = "UpdatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Size/count thresholds for automatically numbered blocks
///
/// A zero threshold is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverPolicy {
    /// Start a new block once the current one reaches this many bytes
    pub max_bytes: u64,
    /// Start a new block once the current one holds this many records
    pub max_records: usize,
}

impl RolloverPolicy {
    /// Build a policy
    pub fn new(max_bytes: u64, max_records: usize) -> Self {
        Self {
            max_bytes,
            max_records,
        }
    }

    /// Whether a block of this size and record count takes no more records
    pub fn is_full(&self, size: u64, records: usize) -> bool {
        (self.max_bytes > 0 && size >= self.max_bytes)
            || (self.max_records > 0 && records >= self.max_records)
    }
}

/// Block partition of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKey {
    /// Fixed block name
    Named(String),
    /// `b0`, `b1`, ... rolling over per policy
    Rollover(RolloverPolicy),
}

/// Record key inside a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// Fixed key
    Named(String),
    /// Next value of the dataset's id counter
    Next,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Named(k) => f.write_str(k),
            RecordKey::Next => f.write_str("<next>"),
        }
    }
}

/// A storable type
pub trait Model: Serialize + DeserializeOwned + Send + 'static {
    /// Dataset (directory) name
    const DATASET: &'static str;

    /// Block this record belongs to; consulted only while the id is unset
    fn block(&self) -> BlockKey;

    /// Key of this record within its block; consulted only while the id is unset
    fn record_key(&self) -> RecordKey {
        RecordKey::Next
    }

    /// Indexed fields
    fn indexes(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Reject invalid models before they are stored
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Lock marker names; empty means the model is not lockable
    fn lock_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Store this model encrypted
    fn should_encrypt(&self) -> bool {
        false
    }

    /// Bookkeeping fields
    fn metadata(&self) -> &Metadata;

    /// Bookkeeping fields, mutable
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Full id, empty before the first insert
    fn id(&self) -> &str {
        &self.metadata().id
    }
}

type Extractor = Box<dyn Fn(&Record) -> Option<Map<String, Value>> + Send + Sync>;

/// Index extractors for records stored without precomputed index values
///
/// Records written in the bare (v1) envelope carry no index map; registering
/// the model type lets the index manager hydrate them and ask the model.
#[derive(Default)]
pub struct ModelRegistry {
    extractors: HashMap<&'static str, Extractor>,
}

impl ModelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` for its dataset
    pub fn register<M: Model>(&mut self) -> &mut Self {
        self.extractors.insert(
            M::DATASET,
            Box::new(|record: &Record| record.hydrate::<M>().ok().map(|m| m.indexes())),
        );
        self
    }

    /// Whether a model is registered for `dataset`
    pub fn contains(&self, dataset: &str) -> bool {
        self.extractors.contains_key(dataset)
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("datasets", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LegacyIndexes for ModelRegistry {
    fn indexes_for(&self, dataset: &str, record: &Record) -> Option<Map<String, Value>> {
        self.extractors.get(dataset).and_then(|f| f(record))
    }
}
