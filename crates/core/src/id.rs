//! Record addressing
//!
//! Every record is addressed by `Dataset/Block/Record`. The first two segments
//! locate the block file on disk, the last one is the key inside that file.

use crate::error::{Error, Result};
use std::fmt;

/// Separator between the three id segments
pub const ID_SEPARATOR: char = '/';

/// A parsed, three-part record id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    /// Dataset (directory) name
    pub dataset: String,
    /// Block (file stem) name
    pub block: String,
    /// Record key inside the block
    pub record: String,
}

impl RecordId {
    /// Build an id from its parts
    pub fn new(
        dataset: impl Into<String>,
        block: impl Into<String>,
        record: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            block: block.into(),
            record: record.into(),
        }
    }

    /// Parse `ds/blk/rec`.
    ///
    /// # Errors
    ///
    /// `InvalidId` unless the id has exactly three non-empty segments.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.split(ID_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ds), Some(blk), Some(rec), None)
                if !ds.is_empty() && !blk.is_empty() && !rec.is_empty() =>
            {
                Ok(Self::new(ds, blk, rec))
            }
            _ => Err(Error::InvalidId(id.to_string())),
        }
    }

    /// `ds/blk`
    pub fn block_id(&self) -> String {
        format!("{}{}{}", self.dataset, ID_SEPARATOR, self.block)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.dataset,
            self.block,
            self.record,
            sep = ID_SEPARATOR
        )
    }
}

impl std::str::FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
