//! The discovery catalog: every stream a tap can extract, with schema,
//! metadata and replication settings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::{MetadataEntry, MetadataMap};

/// How a stream's records are replicated across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMethod {
    #[serde(rename = "INCREMENTAL")]
    Incremental,
    #[serde(rename = "FULL_TABLE")]
    FullTable,
}

impl ReplicationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMethod::Incremental => "INCREMENTAL",
            ReplicationMethod::FullTable => "FULL_TABLE",
        }
    }
}

/// One discoverable stream.
///
/// `replication_key` is present exactly when the method is `INCREMENTAL`;
/// full-table streams serialize it as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub stream: String,
    pub tap_stream_id: String,
    pub schema: Value,
    pub metadata: Vec<MetadataEntry>,
    pub key_properties: Vec<String>,
    pub replication_key: Option<String>,
    pub replication_method: ReplicationMethod,
}

impl CatalogEntry {
    /// True when the stream-level metadata marks this stream selected.
    /// Streams are unselected unless the catalog says otherwise.
    pub fn is_selected(&self) -> bool {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .and_then(|entry| entry.metadata.get("selected"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Metadata in map form for per-field lookups during transformation.
    pub fn metadata_map(&self) -> MetadataMap {
        MetadataMap::from_entries(&self.metadata)
    }
}

/// The discovery document emitted by `--discover` and consumed by sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams
            .iter()
            .find(|entry| entry.tap_stream_id == tap_stream_id)
    }
}
