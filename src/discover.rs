//! Stream discovery: the embedded schema registry and the catalog
//! builder.
//!
//! Discovery is deterministic by construction. Schemas and fields are
//! iterated in sorted order and the only run-dependent input is the
//! credential's capability classification, so identical inputs always
//! serialize to an identical catalog.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use shopify_api::ShopifyClient;
use singer::{field_breadcrumb, Catalog, CatalogEntry, Inclusion, MetadataMap};
use tracing::info;

use crate::capability::Capability;
use crate::context::{SDC_KEYS, SDC_PREFIX};
use crate::streams::{Stream, StreamRegistry};

/// The embedded JSON Schema documents, keyed by stream name.
pub fn load_schemas() -> anyhow::Result<BTreeMap<&'static str, Value>> {
    let sources: &[(&str, &str)] = &[
        (
            "abandoned_checkouts",
            include_str!("../schemas/abandoned_checkouts.json"),
        ),
        (
            "custom_collections",
            include_str!("../schemas/custom_collections.json"),
        ),
        ("customers", include_str!("../schemas/customers.json")),
        ("events", include_str!("../schemas/events.json")),
        (
            "fulfillment_orders",
            include_str!("../schemas/fulfillment_orders.json"),
        ),
        ("locations", include_str!("../schemas/locations.json")),
        ("metafields", include_str!("../schemas/metafields.json")),
        ("orders", include_str!("../schemas/orders.json")),
        ("price_rules", include_str!("../schemas/price_rules.json")),
        ("products", include_str!("../schemas/products.json")),
    ];
    let mut schemas = BTreeMap::new();
    for (name, raw) in sources {
        let schema = serde_json::from_str(raw)
            .with_context(|| format!("embedded schema for '{name}' is not valid JSON"))?;
        schemas.insert(*name, schema);
    }
    Ok(schemas)
}

/// Runs discovery: classify the credential's capabilities, then build
/// the catalog from the embedded schemas and the stream registry.
pub async fn discover(
    client: &ShopifyClient,
    registry: &StreamRegistry,
) -> anyhow::Result<Catalog> {
    let scopes = client
        .access_scopes()
        .await
        .context("unable to fetch access scopes for discovery")?;
    info!(scopes = scopes.len(), "classified credential capabilities");
    let capability = Capability::new(scopes);
    build_catalog(load_schemas()?, registry, &capability)
}

/// Builds the catalog for every stream that has both a schema and a
/// registered strategy.
pub fn build_catalog(
    mut schemas: BTreeMap<&'static str, Value>,
    registry: &StreamRegistry,
    capability: &Capability,
) -> anyhow::Result<Catalog> {
    let mut streams = Vec::new();
    for stream in registry.iter() {
        let Some(mut schema) = schemas.remove(stream.tap_stream_id()) else {
            bail!(
                "stream '{}' is registered but has no embedded schema",
                stream.tap_stream_id()
            );
        };
        add_synthetic_keys(&mut schema);
        streams.push(catalog_entry(stream, schema, capability));
    }
    Ok(Catalog { streams })
}

/// Declares the `_sdc_shop_*` fields on a stream schema so they survive
/// transformation on every emitted record.
fn add_synthetic_keys(schema: &mut Value) {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for (key, json_type) in SDC_KEYS {
            properties.insert(
                format!("{SDC_PREFIX}{key}"),
                json!({"type": ["null", json_type]}),
            );
        }
    }
}

fn catalog_entry(stream: &dyn Stream, schema: Value, capability: &Capability) -> CatalogEntry {
    let key_properties: Vec<String> = stream
        .key_properties()
        .iter()
        .map(|key| key.to_string())
        .collect();
    let replication_key = stream.replication_key();

    let mut mdata = MetadataMap::new();
    mdata.write(vec![], "table-key-properties", json!(key_properties));
    mdata.write(
        vec![],
        "forced-replication-method",
        json!(stream.replication_method().as_str()),
    );
    if let Some(key) = replication_key {
        mdata.write(vec![], "valid-replication-keys", json!([key]));
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for field in properties.keys() {
            let inclusion = if key_properties.iter().any(|key| key == field)
                || replication_key == Some(field.as_str())
            {
                Inclusion::Automatic
            } else if !capability.field_supported(field) {
                Inclusion::Unsupported
            } else {
                Inclusion::Available
            };
            mdata.write(
                field_breadcrumb(field),
                "inclusion",
                json!(inclusion.as_str()),
            );
        }
    }

    CatalogEntry {
        stream: stream.tap_stream_id().to_string(),
        tap_stream_id: stream.tap_stream_id().to_string(),
        schema,
        metadata: mdata.to_entries(),
        key_properties,
        replication_key: replication_key.map(str::to_string),
        replication_method: stream.replication_method(),
    }
}
