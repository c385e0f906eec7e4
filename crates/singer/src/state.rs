//! Run state: per-stream bookmarks and the in-progress stream marker.
//!
//! The state document is received through the CLI, mutated only by the
//! sync loop, and flushed back out as STATE messages. Top-level keys the
//! runner supplied that this tap does not understand are preserved
//! verbatim so round-tripping through a pipeline loses nothing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bookmark key marking which stream a run was working on when state was
/// last written. Presence means the previous run did not finish that
/// stream.
pub const CURRENTLY_SYNC_STREAM: &str = "currently_sync_stream";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub bookmarks: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl State {
    /// Cursor recorded for a stream under its replication key.
    pub fn get_bookmark(&self, stream: &str, key: &str) -> Option<&Value> {
        self.bookmarks.get(stream)?.get(key)
    }

    /// Records a cursor for a stream. A non-object bookmark bucket left by
    /// a corrupt state file is replaced rather than propagated.
    pub fn write_bookmark(&mut self, stream: &str, key: &str, value: Value) {
        let bucket = self
            .bookmarks
            .entry(stream.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !bucket.is_object() {
            *bucket = Value::Object(Map::new());
        }
        if let Some(map) = bucket.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn currently_sync_stream(&self) -> Option<&str> {
        self.bookmarks.get(CURRENTLY_SYNC_STREAM).and_then(Value::as_str)
    }

    pub fn set_currently_sync_stream(&mut self, stream: &str) {
        self.bookmarks.insert(
            CURRENTLY_SYNC_STREAM.to_string(),
            Value::String(stream.to_string()),
        );
    }

    pub fn clear_currently_sync_stream(&mut self) {
        self.bookmarks.remove(CURRENTLY_SYNC_STREAM);
    }

    /// The document emitted in STATE messages. Infallible by construction,
    /// and identical to the serde serialization of `self`.
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        if !self.bookmarks.is_empty() {
            map.insert(
                "bookmarks".to_string(),
                Value::Object(self.bookmarks.clone()),
            );
        }
        Value::Object(map)
    }
}
