//! Metadata index entries kept alongside every stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index entry for a single stored object.
///
/// Exactly one entry exists per `(bucket, key)` for as long as the object's
/// bytes exist on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Object key within its bucket.
    pub key: String,

    /// Time of the most recent successful upload.
    pub created_at: DateTime<Utc>,
}

impl ObjectMetadata {
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            created_at,
        }
    }
}

/// The whole index: bucket → key → metadata.
///
/// Persisted as a single JSON document and rewritten as a unit.
pub type MetadataIndex = BTreeMap<String, BTreeMap<String, ObjectMetadata>>;
