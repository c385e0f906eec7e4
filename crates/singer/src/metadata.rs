//! Catalog metadata: breadcrumb-addressed annotations on streams and fields.
//!
//! Serialized catalogs carry metadata as a list of `{breadcrumb, metadata}`
//! entries; builders and lookups work on the map form keyed by breadcrumb.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Path addressing a metadata entry: empty for the stream itself,
/// `["properties", <field>]` for one of its fields.
pub type Breadcrumb = Vec<String>;

/// Builds the breadcrumb for a top-level record field.
pub fn field_breadcrumb(name: &str) -> Breadcrumb {
    vec!["properties".to_string(), name.to_string()]
}

/// Whether a field is emitted for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    /// Always emitted: key properties and the replication key.
    Automatic,
    /// Emitted when the field survives transformation.
    Available,
    /// Never emitted, e.g. a field the credential lacks a scope for.
    Unsupported,
}

impl Inclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Inclusion::Automatic => "automatic",
            Inclusion::Available => "available",
            Inclusion::Unsupported => "unsupported",
        }
    }

    pub fn parse(s: &str) -> Option<Inclusion> {
        match s {
            "automatic" => Some(Inclusion::Automatic),
            "available" => Some(Inclusion::Available),
            "unsupported" => Some(Inclusion::Unsupported),
            _ => None,
        }
    }
}

/// One entry of the serialized metadata list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Breadcrumb,
    pub metadata: Map<String, Value>,
}

/// Metadata keyed by breadcrumb.
///
/// The map form keeps one bucket per breadcrumb, so a catalog built through
/// it can never contain duplicate entries. Conversion to the list form
/// orders the stream-level entry first, then fields alphabetically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMap(BTreeMap<Breadcrumb, Map<String, Value>>);

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` under `breadcrumb`, creating the bucket if needed.
    pub fn write(&mut self, breadcrumb: Breadcrumb, key: &str, value: Value) {
        self.0
            .entry(breadcrumb)
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, breadcrumb: &[String], key: &str) -> Option<&Value> {
        self.0.get(breadcrumb)?.get(key)
    }

    /// Inclusion class recorded for a top-level field, if any.
    pub fn inclusion(&self, field: &str) -> Option<Inclusion> {
        self.get(&field_breadcrumb(field), "inclusion")?
            .as_str()
            .and_then(Inclusion::parse)
    }

    pub fn is_unsupported(&self, field: &str) -> bool {
        self.inclusion(field) == Some(Inclusion::Unsupported)
    }

    /// List form for serialization. The empty breadcrumb sorts first, field
    /// breadcrumbs follow in name order, so output is deterministic.
    pub fn to_entries(&self) -> Vec<MetadataEntry> {
        self.0
            .iter()
            .map(|(breadcrumb, metadata)| MetadataEntry {
                breadcrumb: breadcrumb.clone(),
                metadata: metadata.clone(),
            })
            .collect()
    }

    /// Rebuilds the map form from a deserialized catalog entry. Later
    /// duplicate breadcrumbs overwrite earlier ones key by key.
    pub fn from_entries(entries: &[MetadataEntry]) -> Self {
        let mut map = Self::new();
        for entry in entries {
            for (key, value) in &entry.metadata {
                map.write(entry.breadcrumb.clone(), key, value.clone());
            }
        }
        map
    }
}
