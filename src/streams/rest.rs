//! The shared strategy behind every REST-listed resource.
//!
//! All REST streams behave identically: the first page is filtered to
//! records at or after the bookmark (or the configured start date),
//! subsequent pages follow the `Link` header cursor, and the bookmark
//! advances to the page's highest replication value once the page has
//! been fully yielded.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use shopify_api::ShopifyClient;
use singer::State;
use tracing::debug;

use crate::config::TapConfig;
use crate::streams::{page_high_water, RecordStream, Stream};

/// One REST-backed stream, declared by its endpoint and replication
/// descriptors.
pub struct RestStream {
    name: &'static str,
    endpoint: &'static str,
    envelope: &'static str,
    replication_key: Option<&'static str>,
    key_properties: &'static [&'static str],
    /// Extra query pairs sent on the first page, e.g. `status=any` so
    /// closed and cancelled orders are not silently dropped.
    extra_query: &'static [(&'static str, &'static str)],
}

/// Definitions for every REST-backed stream in the registry.
pub(crate) fn builtin_streams() -> Vec<RestStream> {
    vec![
        RestStream {
            name: "abandoned_checkouts",
            endpoint: "checkouts.json",
            envelope: "checkouts",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[("status", "any")],
        },
        RestStream {
            name: "custom_collections",
            endpoint: "custom_collections.json",
            envelope: "custom_collections",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "customers",
            endpoint: "customers.json",
            envelope: "customers",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "events",
            endpoint: "events.json",
            envelope: "events",
            replication_key: Some("created_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "locations",
            endpoint: "locations.json",
            envelope: "locations",
            replication_key: None,
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "metafields",
            endpoint: "metafields.json",
            envelope: "metafields",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "orders",
            endpoint: "orders.json",
            envelope: "orders",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[("status", "any")],
        },
        RestStream {
            name: "price_rules",
            endpoint: "price_rules.json",
            envelope: "price_rules",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
        RestStream {
            name: "products",
            endpoint: "products.json",
            envelope: "products",
            replication_key: Some("updated_at"),
            key_properties: &["id"],
            extra_query: &[],
        },
    ]
}

impl RestStream {
    /// Query for the first page: page size, the replication floor when
    /// the stream is incremental, and any stream-specific filters.
    fn initial_query(&self, config: &TapConfig, state: &State) -> Vec<(String, String)> {
        let mut query = vec![("limit".to_string(), config.results_per_page.to_string())];
        if let Some(key) = self.replication_key {
            let floor = state
                .get_bookmark(self.name, key)
                .and_then(Value::as_str)
                .unwrap_or(&config.start_date)
                .to_string();
            query.push((format!("{key}_min"), floor));
        }
        for (name, value) in self.extra_query {
            query.push((name.to_string(), value.to_string()));
        }
        query
    }
}

impl Stream for RestStream {
    fn tap_stream_id(&self) -> &'static str {
        self.name
    }

    fn key_properties(&self) -> &'static [&'static str] {
        self.key_properties
    }

    fn replication_key(&self) -> Option<&'static str> {
        self.replication_key
    }

    fn records(
        &self,
        client: &ShopifyClient,
        config: &TapConfig,
        state: &State,
    ) -> Box<dyn RecordStream> {
        Box::new(RestRecordStream {
            client: client.clone(),
            stream: self.name,
            endpoint: self.endpoint,
            envelope: self.envelope,
            replication_key: self.replication_key,
            results_per_page: config.results_per_page,
            first_query: Some(self.initial_query(config, state)),
            next_page_info: None,
            buffer: VecDeque::new(),
            pending: None,
            committed: None,
            done: false,
        })
    }
}

struct RestRecordStream {
    client: ShopifyClient,
    stream: &'static str,
    endpoint: &'static str,
    envelope: &'static str,
    replication_key: Option<&'static str>,
    results_per_page: u32,
    /// Filters for the first request; pages after it carry the cursor.
    first_query: Option<Vec<(String, String)>>,
    next_page_info: Option<String>,
    buffer: VecDeque<Value>,
    /// High-water mark of the page currently in the buffer.
    pending: Option<DateTime<Utc>>,
    /// High-water mark of the pages already fully yielded.
    committed: Option<DateTime<Utc>>,
    done: bool,
}

impl RestRecordStream {
    async fn fetch_page(&mut self) -> anyhow::Result<()> {
        let query = match (self.first_query.take(), self.next_page_info.take()) {
            (Some(query), _) => query,
            (None, Some(cursor)) => vec![
                ("limit".to_string(), self.results_per_page.to_string()),
                ("page_info".to_string(), cursor),
            ],
            (None, None) => {
                self.done = true;
                return Ok(());
            }
        };
        let page = self.client.get(self.endpoint, &query).await?;
        self.next_page_info = page.next_page_info.clone();
        if self.next_page_info.is_none() {
            self.done = true;
        }
        let records = page.records(self.envelope, self.endpoint)?;
        debug!(
            stream = self.stream,
            records = records.len(),
            more = !self.done,
            "fetched page"
        );
        if let Some(key) = self.replication_key {
            let high = page_high_water(&records, key);
            self.pending = match (self.pending.take(), high) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        self.buffer.extend(records);
        Ok(())
    }
}

#[async_trait]
impl RecordStream for RestRecordStream {
    async fn next(&mut self) -> Option<anyhow::Result<Value>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                if self.buffer.is_empty() {
                    // The page is fully yielded; its high-water mark is
                    // now safe to resume from.
                    if let Some(mark) = self.pending.take() {
                        self.committed =
                            Some(self.committed.map_or(mark, |current| current.max(mark)));
                    }
                }
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page().await {
                self.done = true;
                return Some(Err(e));
            }
        }
    }

    fn bookmark(&self) -> Option<Value> {
        self.committed
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
    }
}
