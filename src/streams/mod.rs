//! Stream strategies: the per-resource sync implementations behind a
//! uniform contract.
//!
//! The sync loop only ever sees the [`Stream`] and [`RecordStream`]
//! traits; how a resource is actually fetched (REST listing, GraphQL
//! connection) is the strategy's business. New resource types plug in by
//! registering a strategy and dropping a schema file next to the others.

mod fulfillment_orders;
mod rest;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shopify_api::ShopifyClient;
use singer::{ReplicationMethod, State};

use crate::config::TapConfig;

pub use fulfillment_orders::FulfillmentOrdersStream;
pub use rest::RestStream;

/// A synchronizable resource: static replication descriptors plus a
/// producer of its records.
pub trait Stream: Send + Sync {
    /// Unique stream identifier, also the schema registry key.
    fn tap_stream_id(&self) -> &'static str;

    /// Primary key fields.
    fn key_properties(&self) -> &'static [&'static str];

    /// Field records are filtered and bookmarked by when syncing
    /// incrementally. `None` means every run re-reads the whole table.
    fn replication_key(&self) -> Option<&'static str>;

    fn replication_method(&self) -> ReplicationMethod {
        if self.replication_key().is_some() {
            ReplicationMethod::Incremental
        } else {
            ReplicationMethod::FullTable
        }
    }

    /// A lazy producer over the records newer than the stream's bookmark
    /// (or the configured start date). No I/O happens until the first
    /// pull, so building one is free and errors surface in-band.
    fn records(
        &self,
        client: &ShopifyClient,
        config: &TapConfig,
        state: &State,
    ) -> Box<dyn RecordStream>;
}

/// Pull side of one stream sync. Finite and not restartable.
#[async_trait]
pub trait RecordStream: Send {
    /// Next raw record, `None` once the stream is exhausted. Errors are
    /// yielded in-band and end the stream.
    async fn next(&mut self) -> Option<anyhow::Result<Value>>;

    /// The committed resume cursor. Only advances once every record of a
    /// fetched page has been yielded, so a checkpoint written from it
    /// never skips records a crash left unemitted.
    fn bookmark(&self) -> Option<Value>;
}

/// The fixed set of streams this tap can sync, keyed by stream id.
pub struct StreamRegistry {
    streams: BTreeMap<&'static str, Box<dyn Stream>>,
}

impl StreamRegistry {
    pub fn empty() -> Self {
        Self {
            streams: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, stream: Box<dyn Stream>) {
        self.streams.insert(stream.tap_stream_id(), stream);
    }

    pub fn get(&self, tap_stream_id: &str) -> Option<&dyn Stream> {
        self.streams.get(tap_stream_id).map(Box::as_ref)
    }

    /// Streams in stable (sorted) order, for deterministic discovery.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Stream> {
        self.streams.values().map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for StreamRegistry {
    /// Every production stream.
    fn default() -> Self {
        let mut registry = Self::empty();
        for stream in rest::builtin_streams() {
            registry.register(Box::new(stream));
        }
        registry.register(Box::new(FulfillmentOrdersStream));
        registry
    }
}

/// Highest replication value in a fetched page, compared as instants so
/// mixed timezone offsets in API responses cannot corrupt the bookmark.
/// Records missing the key (or with a malformed value) are ignored.
pub(crate) fn page_high_water(records: &[Value], key: &str) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter_map(|record| record.get(key).and_then(Value::as_str))
        .filter_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .max()
}
