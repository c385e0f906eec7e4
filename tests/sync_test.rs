//! Sync loop tests driven end to end with scripted in-memory streams and
//! a recording sink, so message ordering, checkpoint cadence and the
//! partial-failure policy can be asserted without a live store.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shopify_api::{ApiError, ShopifyClient};
use singer::{Catalog, CatalogEntry, Message, MessageSink, MetadataMap, ReplicationMethod, State};
use tap_shopify::config::TapConfig;
use tap_shopify::context::Context;
use tap_shopify::streams::{RecordStream, Stream, StreamRegistry};

// ============================================================
// Test doubles
// ============================================================

/// One scripted action of a fake stream.
#[derive(Clone)]
enum Step {
    /// Yield a record, optionally advancing the committed bookmark once
    /// the record is out.
    Record(Value, Option<&'static str>),
    /// Fail with an unclassified error.
    Fail(&'static str),
    /// Fail with a classified access denial.
    Denied(&'static str),
}

/// Stream fed from a script instead of the Admin API.
struct FakeStream {
    id: &'static str,
    replication_key: Option<&'static str>,
    steps: Vec<Step>,
}

impl Stream for FakeStream {
    fn tap_stream_id(&self) -> &'static str {
        self.id
    }

    fn key_properties(&self) -> &'static [&'static str] {
        &["id"]
    }

    fn replication_key(&self) -> Option<&'static str> {
        self.replication_key
    }

    fn records(
        &self,
        _client: &ShopifyClient,
        _config: &TapConfig,
        _state: &State,
    ) -> Box<dyn RecordStream> {
        Box::new(FakeRecordStream {
            steps: self.steps.clone().into(),
            bookmark: None,
        })
    }
}

struct FakeRecordStream {
    steps: VecDeque<Step>,
    bookmark: Option<Value>,
}

#[async_trait]
impl RecordStream for FakeRecordStream {
    async fn next(&mut self) -> Option<anyhow::Result<Value>> {
        match self.steps.pop_front()? {
            Step::Record(value, advance) => {
                if let Some(mark) = advance {
                    self.bookmark = Some(Value::String(mark.to_string()));
                }
                Some(Ok(value))
            }
            Step::Fail(message) => Some(Err(anyhow::anyhow!("{message}"))),
            Step::Denied(message) => Some(Err(anyhow::Error::new(ApiError::AccessDenied(
                message.to_string(),
            )))),
        }
    }

    fn bookmark(&self) -> Option<Value> {
        self.bookmark.clone()
    }
}

/// Sink accumulating every emitted message in order.
#[derive(Default)]
struct RecordingSink {
    messages: Vec<Message>,
}

impl MessageSink for RecordingSink {
    fn write(&mut self, message: &Message) -> anyhow::Result<()> {
        self.messages.push(message.clone());
        Ok(())
    }
}

/// Sink that records schema and record messages but fails every state
/// checkpoint write.
#[derive(Default)]
struct FailingSink {
    messages: Vec<Message>,
}

impl MessageSink for FailingSink {
    fn write(&mut self, message: &Message) -> anyhow::Result<()> {
        if matches!(message, Message::State { .. }) {
            anyhow::bail!("checkpoint write failed");
        }
        self.messages.push(message.clone());
        Ok(())
    }
}

// ============================================================
// Fixtures
// ============================================================

/// Object schema declaring `fields` plus the synthetic shop keys, so the
/// transformer keeps them. Fields ending in `_at` are date-times.
fn schema(fields: &[&str]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let prop = if field.ends_with("_at") {
            json!({"type": ["null", "string"], "format": "date-time"})
        } else {
            json!({"type": ["null", "integer", "string"]})
        };
        properties.insert(field.to_string(), prop);
    }
    properties.insert(
        "_sdc_shop_id".to_string(),
        json!({"type": ["null", "integer"]}),
    );
    properties.insert(
        "_sdc_shop_name".to_string(),
        json!({"type": ["null", "string"]}),
    );
    properties.insert(
        "_sdc_shop_myshopify_domain".to_string(),
        json!({"type": ["null", "string"]}),
    );
    json!({"type": "object", "properties": properties})
}

fn entry(
    id: &str,
    replication_key: Option<&str>,
    fields: &[&str],
    selected: bool,
) -> CatalogEntry {
    let replication_method = if replication_key.is_some() {
        ReplicationMethod::Incremental
    } else {
        ReplicationMethod::FullTable
    };
    let mut mdata = MetadataMap::new();
    mdata.write(vec![], "table-key-properties", json!(["id"]));
    mdata.write(
        vec![],
        "forced-replication-method",
        json!(replication_method.as_str()),
    );
    if selected {
        mdata.write(vec![], "selected", json!(true));
    }
    CatalogEntry {
        stream: id.to_string(),
        tap_stream_id: id.to_string(),
        schema: schema(fields),
        metadata: mdata.to_entries(),
        key_properties: vec!["id".to_string()],
        replication_key: replication_key.map(str::to_string),
        replication_method,
    }
}

/// Run context whose client points at a closed port. The fake streams
/// never touch it.
fn context(catalog: Catalog, state: State) -> Context {
    let config = TapConfig::from_json(r#"{"shop": "teststore", "api_key": "token"}"#).unwrap();
    let client = ShopifyClient::with_base_url("http://127.0.0.1:9", "token", "2025-01").unwrap();
    let shop = json!({
        "id": 42,
        "name": "Test Store",
        "myshopify_domain": "teststore.myshopify.com"
    });
    Context::new(config, client, catalog, state, &shop)
}

fn kind(message: &Message) -> &'static str {
    match message {
        Message::Schema { .. } => "SCHEMA",
        Message::Record { .. } => "RECORD",
        Message::State { .. } => "STATE",
    }
}

fn record_streams(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::Record { stream, .. } => Some(stream.as_str()),
            _ => None,
        })
        .collect()
}

fn state_values(messages: &[Message]) -> Vec<&Value> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::State { value } => Some(value),
            _ => None,
        })
        .collect()
}

fn only_record(messages: &[Message], stream: &str) -> Value {
    let records: Vec<&Value> = messages
        .iter()
        .filter_map(|message| match message {
            Message::Record { stream: s, record, .. } if s == stream => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(records.len(), 1, "expected exactly one record for {stream}");
    records[0].clone()
}

// ============================================================
// Ordering and resume
// ============================================================

#[tokio::test]
async fn test_schemas_precede_records_in_resume_order() {
    let mut registry = StreamRegistry::empty();
    for id in ["alpha", "beta", "gamma", "delta"] {
        registry.register(Box::new(FakeStream {
            id,
            replication_key: None,
            steps: vec![Step::Record(json!({"id": 1}), None)],
        }));
    }
    let catalog = Catalog {
        streams: vec![
            entry("alpha", None, &["id"], true),
            entry("beta", None, &["id"], true),
            entry("gamma", None, &["id"], true),
            entry("delta", None, &["id"], true),
        ],
    };
    let mut state = State::default();
    state.set_currently_sync_stream("gamma");
    let mut ctx = context(catalog, state);
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    // Every schema is announced, in resume order, before any record.
    let schemas: Vec<&str> = sink
        .messages
        .iter()
        .filter_map(|message| match message {
            Message::Schema { stream, .. } => Some(stream.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(schemas, vec!["gamma", "delta", "alpha", "beta"]);
    assert!(sink.messages[..4]
        .iter()
        .all(|message| kind(message) == "SCHEMA"));

    // Streams then drain one at a time in the same order.
    assert_eq!(
        record_streams(&sink.messages),
        vec!["gamma", "delta", "alpha", "beta"]
    );
    assert_eq!(ctx.state.currently_sync_stream(), None);
}

#[tokio::test]
async fn test_unselected_streams_produce_no_output() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(json!({"id": 1}), None)],
    }));
    let catalog = Catalog {
        streams: vec![entry("orders", Some("updated_at"), &["id", "updated_at"], false)],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    assert!(sink.messages.is_empty());
    assert!(ctx.counts.is_empty());
}

// ============================================================
// Checkpoint cadence
// ============================================================

#[tokio::test]
async fn test_state_checkpoints_follow_bookmark_advances() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![
            Step::Record(
                json!({"id": 1, "updated_at": "2024-05-01T00:00:00Z"}),
                Some("2024-05-01T00:00:00.000000Z"),
            ),
            Step::Record(
                json!({"id": 2, "updated_at": "2024-05-02T00:00:00Z"}),
                Some("2024-05-02T00:00:00.000000Z"),
            ),
        ],
    }));
    let catalog = Catalog {
        streams: vec![entry("orders", Some("updated_at"), &["id", "updated_at"], true)],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    let kinds: Vec<&str> = sink.messages.iter().map(kind).collect();
    assert_eq!(
        kinds,
        vec!["SCHEMA", "STATE", "RECORD", "STATE", "RECORD", "STATE", "STATE"]
    );

    // Marker set before the first record, bookmark advanced after each
    // page, marker gone once the stream completes.
    let states = state_values(&sink.messages);
    assert_eq!(
        states[0],
        &json!({"bookmarks": {"currently_sync_stream": "orders"}})
    );
    assert_eq!(
        states[1],
        &json!({"bookmarks": {
            "currently_sync_stream": "orders",
            "orders": {"updated_at": "2024-05-01T00:00:00.000000Z"}
        }})
    );
    assert_eq!(
        states[2],
        &json!({"bookmarks": {
            "currently_sync_stream": "orders",
            "orders": {"updated_at": "2024-05-02T00:00:00.000000Z"}
        }})
    );
    assert_eq!(
        states[3],
        &json!({"bookmarks": {"orders": {"updated_at": "2024-05-02T00:00:00.000000Z"}}})
    );

    match &sink.messages[0] {
        Message::Schema {
            bookmark_properties,
            ..
        } => assert_eq!(bookmark_properties, &Some(vec!["updated_at".to_string()])),
        other => panic!("expected schema message, got {other:?}"),
    }
    assert_eq!(ctx.counts["orders"], 2);
}

#[tokio::test]
async fn test_records_carry_shop_fields_and_extraction_time() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(
            json!({"id": 7, "updated_at": "2024-05-01T08:30:00+02:00"}),
            None,
        )],
    }));
    let catalog = Catalog {
        streams: vec![entry("orders", Some("updated_at"), &["id", "updated_at"], true)],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    let record = only_record(&sink.messages, "orders");
    assert_eq!(
        record,
        json!({
            "id": 7,
            "updated_at": "2024-05-01T06:30:00.000000Z",
            "_sdc_shop_id": 42,
            "_sdc_shop_name": "Test Store",
            "_sdc_shop_myshopify_domain": "teststore.myshopify.com"
        })
    );

    let time_extracted = sink.messages.iter().find_map(|message| match message {
        Message::Record { time_extracted, .. } => time_extracted.clone(),
        _ => None,
    });
    let stamp = time_extracted.unwrap();
    assert!(stamp.ends_with('Z'), "not UTC: {stamp}");
    assert!(
        chrono::DateTime::parse_from_rfc3339(&stamp).is_ok(),
        "not RFC 3339: {stamp}"
    );
}

#[tokio::test]
async fn test_shop_fields_override_record_collisions() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: None,
        steps: vec![Step::Record(json!({"id": 1, "_sdc_shop_id": 999}), None)],
    }));
    let catalog = Catalog {
        streams: vec![entry("orders", None, &["id"], true)],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    let record = only_record(&sink.messages, "orders");
    assert_eq!(record["_sdc_shop_id"], json!(42));
}

#[tokio::test]
async fn test_epoch_timestamps_normalized_in_output() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "events",
        replication_key: Some("created_at"),
        steps: vec![Step::Record(json!({"id": 1, "created_at": 1709294400}), None)],
    }));
    let catalog = Catalog {
        streams: vec![entry("events", Some("created_at"), &["id", "created_at"], true)],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap();

    let record = only_record(&sink.messages, "events");
    assert_eq!(record["created_at"], json!("2024-03-01T12:00:00.000000Z"));
}

// ============================================================
// Failure policy
// ============================================================

#[tokio::test]
async fn test_fatal_error_stops_later_streams() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "alpha",
        replication_key: Some("updated_at"),
        steps: vec![
            Step::Record(json!({"id": 1, "updated_at": "2024-05-01T00:00:00Z"}), None),
            Step::Fail("connection reset by peer"),
        ],
    }));
    registry.register(Box::new(FakeStream {
        id: "beta",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(json!({"id": 2, "updated_at": "2024-05-01T00:00:00Z"}), None)],
    }));
    let catalog = Catalog {
        streams: vec![
            entry("alpha", Some("updated_at"), &["id", "updated_at"], true),
            entry("beta", Some("updated_at"), &["id", "updated_at"], true),
        ],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    let err = tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap_err();

    let rendered = format!("{err:#}");
    assert!(rendered.contains("failed to sync stream 'alpha'"), "{rendered}");
    assert!(rendered.contains("connection reset by peer"), "{rendered}");

    // beta never started; the record already emitted for alpha counted.
    assert_eq!(record_streams(&sink.messages), vec!["alpha"]);
    assert_eq!(ctx.counts["alpha"], 1);
    assert_eq!(ctx.counts["beta"], 0);

    // The marker survives so a rerun resumes at the interrupted stream.
    assert_eq!(ctx.state.currently_sync_stream(), Some("alpha"));
}

#[tokio::test]
async fn test_access_denied_on_fulfillment_orders_is_deferred() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "fulfillment_orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Denied("missing merchant-managed scope")],
    }));
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(
            json!({"id": 1, "updated_at": "2024-05-01T00:00:00Z"}),
            Some("2024-05-01T00:00:00.000000Z"),
        )],
    }));
    let catalog = Catalog {
        streams: vec![
            entry(
                "fulfillment_orders",
                Some("updated_at"),
                &["id", "updated_at"],
                true,
            ),
            entry("orders", Some("updated_at"), &["id", "updated_at"], true),
        ],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    let err = tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap_err();

    // The remaining stream synced to completion before the run failed
    // with the re-authorization message.
    assert_eq!(
        err.to_string(),
        "Required scopes are missing for the `fulfillment_orders` stream. \
         Please re-authorize the connection to sync this stream."
    );
    assert_eq!(record_streams(&sink.messages), vec!["orders"]);
    assert_eq!(ctx.counts["orders"], 1);
    assert_eq!(ctx.counts["fulfillment_orders"], 0);
    assert_eq!(
        ctx.state.get_bookmark("orders", "updated_at"),
        Some(&json!("2024-05-01T00:00:00.000000Z"))
    );
    assert_eq!(ctx.state.get_bookmark("fulfillment_orders", "updated_at"), None);
}

#[tokio::test]
async fn test_checkpoint_write_failure_aborts_the_run() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(
            json!({"id": 1, "updated_at": "2024-05-01T00:00:00Z"}),
            Some("2024-05-01T00:00:00.000000Z"),
        )],
    }));
    registry.register(Box::new(FakeStream {
        id: "products",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(json!({"id": 2, "updated_at": "2024-05-01T00:00:00Z"}), None)],
    }));
    let catalog = Catalog {
        streams: vec![
            entry("orders", Some("updated_at"), &["id", "updated_at"], true),
            entry("products", Some("updated_at"), &["id", "updated_at"], true),
        ],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = FailingSink::default();

    let err = tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap_err();

    let rendered = format!("{err:#}");
    assert!(rendered.contains("checkpoint write failed"), "{rendered}");

    // Both schemas made it out; the failed checkpoint before the first
    // record stopped everything after it, including the second stream.
    let kinds: Vec<&str> = sink.messages.iter().map(kind).collect();
    assert_eq!(kinds, vec!["SCHEMA", "SCHEMA"]);
    assert_eq!(ctx.counts["orders"], 0);
    assert_eq!(ctx.counts["products"], 0);

    // The marker names the interrupted stream so a rerun resumes there.
    assert_eq!(ctx.state.currently_sync_stream(), Some("orders"));
}

#[tokio::test]
async fn test_access_denied_elsewhere_is_fatal() {
    let mut registry = StreamRegistry::empty();
    registry.register(Box::new(FakeStream {
        id: "orders",
        replication_key: Some("updated_at"),
        steps: vec![Step::Denied("no scope for orders")],
    }));
    registry.register(Box::new(FakeStream {
        id: "products",
        replication_key: Some("updated_at"),
        steps: vec![Step::Record(json!({"id": 1, "updated_at": "2024-05-01T00:00:00Z"}), None)],
    }));
    let catalog = Catalog {
        streams: vec![
            entry("orders", Some("updated_at"), &["id", "updated_at"], true),
            entry("products", Some("updated_at"), &["id", "updated_at"], true),
        ],
    };
    let mut ctx = context(catalog, State::default());
    let mut sink = RecordingSink::default();

    let err = tap_shopify::sync::sync(&mut ctx, &registry, &mut sink)
        .await
        .unwrap_err();

    let rendered = format!("{err:#}");
    assert!(rendered.contains("failed to sync stream 'orders'"), "{rendered}");
    assert!(!rendered.contains("re-authorize"), "{rendered}");
    assert!(record_streams(&sink.messages).is_empty());
}
