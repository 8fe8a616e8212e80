//! Core types for gitstore
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy
//! - RecordId: three-part `Dataset/Block/Record` addressing
//! - Record, Envelope: stored documents and their versioned payload formats
//! - crypto: AES-CFB payload encryption
//! - Event: write-path notifications consumed by the commit loop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod error;
pub mod event;
pub mod id;
pub mod record;

pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use id::{RecordId, ID_SEPARATOR};
pub use record::{encode_v2, version_of, Envelope, EnvelopeVersion, Record, DEFAULT_VERSION};
