//! Stored records and their envelope formats
//!
//! A record's raw payload is a JSON string in one of two shapes:
//!
//! - `v1`: the bare model JSON
//! - `v2`: `{"Version":"v2","Data":{...},"Indexes":{...}}`
//!
//! The payload may additionally be encrypted (see [`crate::crypto`]). Records
//! decrypt at most once per in-memory instance.

use crate::crypto;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Tag used when a payload carries no version field
pub const DEFAULT_VERSION: &str = "v1";

/// Envelope discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeVersion {
    /// Bare model JSON
    V1,
    /// `{Version, Data, Indexes}`
    V2,
}

impl EnvelopeVersion {
    /// Map a stored tag to a version
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` for anything other than `v1`/`v2`.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "v1" => Ok(EnvelopeVersion::V1),
            "v2" => Ok(EnvelopeVersion::V2),
            other => Err(Error::UnsupportedVersion(other.to_string())),
        }
    }

    /// Stored tag
    pub fn tag(&self) -> &'static str {
        match self {
            EnvelopeVersion::V1 => "v1",
            EnvelopeVersion::V2 => "v2",
        }
    }
}

/// Decoded record payload
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Bare model JSON
    V1(Value),
    /// Model data plus its precomputed index values
    V2 {
        /// Model JSON
        data: Value,
        /// Index field name to value
        indexes: Map<String, Value>,
    },
}

impl Envelope {
    /// Parse a (decrypted) raw payload
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::BadRecord(e.to_string()))?;
        let tag = value
            .get("Version")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_VERSION);
        match EnvelopeVersion::from_tag(tag)? {
            EnvelopeVersion::V1 => Ok(Envelope::V1(value)),
            EnvelopeVersion::V2 => {
                let Value::Object(mut obj) = value else {
                    return Err(Error::BadRecord("v2 envelope is not an object".into()));
                };
                let data = obj.remove("Data").unwrap_or(Value::Null);
                let indexes = match obj.remove("Indexes") {
                    Some(Value::Object(m)) => m,
                    _ => Map::new(),
                };
                Ok(Envelope::V2 { data, indexes })
            }
        }
    }

    /// Envelope version
    pub fn version(&self) -> EnvelopeVersion {
        match self {
            Envelope::V1(_) => EnvelopeVersion::V1,
            Envelope::V2 { .. } => EnvelopeVersion::V2,
        }
    }

    /// Model JSON
    pub fn data(&self) -> &Value {
        match self {
            Envelope::V1(v) => v,
            Envelope::V2 { data, .. } => data,
        }
    }

    /// Consume into model JSON
    pub fn into_data(self) -> Value {
        match self {
            Envelope::V1(v) => v,
            Envelope::V2 { data, .. } => data,
        }
    }

    /// Stored index values; `None` for v1
    pub fn indexes(&self) -> Option<&Map<String, Value>> {
        match self {
            Envelope::V1(_) => None,
            Envelope::V2 { indexes, .. } => Some(indexes),
        }
    }

    /// Serialize back to a raw payload
    pub fn encode(&self) -> Result<String> {
        match self {
            Envelope::V1(v) => Ok(serde_json::to_string(v)?),
            Envelope::V2 { data, indexes } => encode_v2(data, indexes),
        }
    }
}

/// Build a v2 payload
pub fn encode_v2(data: &Value, indexes: &Map<String, Value>) -> Result<String> {
    let mut obj = Map::new();
    obj.insert("Version".into(), Value::String("v2".into()));
    obj.insert("Data".into(), data.clone());
    obj.insert("Indexes".into(), Value::Object(indexes.clone()));
    Ok(serde_json::to_string(&Value::Object(obj))?)
}

/// Declared version tag of a payload, `v1` when absent or unparsable
pub fn version_of(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("Version").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_VERSION.to_string())
}

// ============================================================================
// Record
// ============================================================================

/// One stored document
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    data: String,
    decrypted: bool,
    indexes: OnceLock<Map<String, Value>>,
}

impl Record {
    /// Wrap a raw payload under its full id
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            decrypted: false,
            indexes: OnceLock::new(),
        }
    }

    /// A record whose payload is already plaintext
    pub fn plaintext(id: impl Into<String>, data: impl Into<String>) -> Self {
        let mut r = Self::new(id, data);
        r.decrypted = true;
        r
    }

    /// Full `ds/blk/rec` id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw payload (plaintext once decrypted)
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Whether [`Record::decrypt`] has already run
    pub fn is_decrypted(&self) -> bool {
        self.decrypted
    }

    /// Decrypt in place, at most once.
    ///
    /// Payloads that are not ciphertext under `key` stay as they are.
    pub fn decrypt(&mut self, key: Option<&[u8]>) {
        if self.decrypted {
            return;
        }
        self.decrypted = true;
        let Some(key) = key else { return };
        if let Ok(plain) = crypto::decrypt(key, &self.data) {
            if serde_json::from_str::<Value>(&plain).is_ok() {
                self.data = plain;
                self.indexes = OnceLock::new();
            }
        }
    }

    /// Declared envelope tag
    pub fn version(&self) -> String {
        version_of(&self.data)
    }

    /// Decode the payload
    pub fn envelope(&self) -> Result<Envelope> {
        Envelope::decode(&self.data)
    }

    /// Decode the model JSON into `T`
    pub fn hydrate<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.envelope()?.into_data();
        serde_json::from_value(data).map_err(|e| Error::BadRecord(format!("{}: {e}", self.id)))
    }

    /// Index values carried in a v2 envelope; empty for v1 or bad payloads
    pub fn indexes(&self) -> &Map<String, Value> {
        self.indexes.get_or_init(|| {
            self.envelope()
                .ok()
                .and_then(|e| e.indexes().cloned())
                .unwrap_or_default()
        })
    }

    /// Model JSON pretty-printed
    pub fn pretty_json(&self) -> Result<String> {
        let data = self.envelope()?.into_data();
        Ok(serde_json::to_string_pretty(&data)?)
    }
}
