//! The sync loop: schema emission, per-stream sequencing, state
//! checkpoints and the partial-failure policy.
//!
//! Observable ordering is strict. Every selected stream's schema is
//! announced before any record flows, streams run one at a time in
//! catalog order (rotated for resume), and each stream is fully drained
//! before the next starts. State is checkpointed before a stream starts,
//! whenever its bookmark advances, and after it completes, so a crash at
//! any point resumes without skipping records.

use anyhow::{bail, Context as _};
use chrono::Utc;
use serde_json::{Map, Value};
use shopify_api::ApiError;
use singer::{CatalogEntry, IntegerDatetimeParsing, Message, MessageSink, Transformer};
use tracing::{info, warn};

use crate::context::Context;
use crate::streams::StreamRegistry;

/// The one stream allowed to fail without failing the whole run, when
/// the failure is an access denial. Shopify grants its scopes separately
/// and long-lived connections commonly predate them, so the operator is
/// told to re-authorize after every other stream has had its chance.
const REAUTH_STREAM: &str = "fulfillment_orders";

const REAUTH_MESSAGE: &str = "Required scopes are missing for the `fulfillment_orders` \
stream. Please re-authorize the connection to sync this stream.";

/// Runs one sync pass over every selected stream in the catalog.
pub async fn sync<S: MessageSink>(
    ctx: &mut Context,
    registry: &StreamRegistry,
    sink: &mut S,
) -> anyhow::Result<()> {
    let mut entries = ctx.catalog.streams.clone();
    if let Some(marker) = ctx.state.currently_sync_stream().map(str::to_string) {
        info!(stream = %marker, "resuming interrupted run");
        rotate_for_resume(&mut entries, &marker);
    }

    // Every selected stream announces its schema before any record flows.
    for entry in &entries {
        if !entry.is_selected() {
            continue;
        }
        let bookmark_properties = entry.replication_key.clone().map(|key| vec![key]);
        sink.write(&Message::schema(
            &entry.tap_stream_id,
            entry.schema.clone(),
            &entry.key_properties,
            bookmark_properties,
        ))?;
        ctx.counts.insert(entry.tap_stream_id.clone(), 0);
    }

    let transformer = Transformer::new(IntegerDatetimeParsing::UnixSeconds);
    let mut require_reauth = false;

    for entry in &entries {
        if !entry.is_selected() {
            info!(stream = %entry.tap_stream_id, "skipping stream: not selected");
            continue;
        }
        info!(stream = %entry.tap_stream_id, "syncing stream");
        ctx.state.set_currently_sync_stream(&entry.tap_stream_id);
        sink.write(&Message::state(ctx.state.to_value()))?;

        match sync_stream(ctx, registry, entry, &transformer, sink).await {
            Ok(count) => {
                info!(stream = %entry.tap_stream_id, records = count, "stream completed");
                ctx.state.clear_currently_sync_stream();
                sink.write(&Message::state(ctx.state.to_value()))?;
            }
            Err(e) if entry.tap_stream_id == REAUTH_STREAM && is_access_denied(&e) => {
                // The marker stays put and no state is written; a rerun
                // after re-authorization picks this stream up first.
                warn!(
                    stream = %entry.tap_stream_id,
                    error = %e,
                    "access denied, continuing with remaining streams"
                );
                require_reauth = true;
            }
            Err(e) => {
                return Err(
                    e.context(format!("failed to sync stream '{}'", entry.tap_stream_id))
                );
            }
        }
    }

    info!("----------------------");
    for (stream, count) in &ctx.counts {
        info!("{stream}: {count}");
    }
    info!("----------------------");

    if require_reauth {
        bail!(REAUTH_MESSAGE);
    }
    Ok(())
}

/// Drains one stream: merge the synthetic shop keys, transform against
/// the catalog schema, emit with an extraction timestamp, count, and
/// checkpoint whenever the producer's committed bookmark advances.
async fn sync_stream<S: MessageSink>(
    ctx: &mut Context,
    registry: &StreamRegistry,
    entry: &CatalogEntry,
    transformer: &Transformer,
    sink: &mut S,
) -> anyhow::Result<u64> {
    let stream = registry.get(&entry.tap_stream_id).with_context(|| {
        format!("catalog references unknown stream '{}'", entry.tap_stream_id)
    })?;
    let metadata = entry.metadata_map();
    let mut records = stream.records(&ctx.client, &ctx.config, &ctx.state);
    let mut last_bookmark: Option<Value> = None;
    let mut count = 0u64;

    while let Some(record) = records.next().await {
        let record = record?;
        let time_extracted = Utc::now();
        let record = merge_sdc_fields(record, ctx.sdc_fields());
        let record = transformer.transform(record, &entry.schema, &metadata)?;
        sink.write(&Message::record(&entry.tap_stream_id, record, time_extracted))?;
        count += 1;
        *ctx.counts.entry(entry.tap_stream_id.clone()).or_insert(0) += 1;

        if let Some(key) = &entry.replication_key {
            if let Some(bookmark) = records.bookmark() {
                if last_bookmark.as_ref() != Some(&bookmark) {
                    ctx.state
                        .write_bookmark(&entry.tap_stream_id, key, bookmark.clone());
                    sink.write(&Message::state(ctx.state.to_value()))?;
                    last_bookmark = Some(bookmark);
                }
            }
        }
    }
    Ok(count)
}

/// Rotates `entries` so the stream named by the resume marker leads,
/// preserving relative order: `[A, B, C, D]` resumed at `C` becomes
/// `[C, D, A, B]`. An unknown marker leaves the order unchanged.
fn rotate_for_resume(entries: &mut [CatalogEntry], marker: &str) {
    let mut idx = 0;
    for (i, entry) in entries.iter().enumerate() {
        if entry.tap_stream_id == marker {
            idx = i;
        }
    }
    entries.rotate_left(idx);
}

/// Stamps the shop attributes onto a record. Shop keys win when the raw
/// record already carries a field of the same name. Non-object records
/// pass through for the transformer to reject.
fn merge_sdc_fields(record: Value, sdc_fields: &Map<String, Value>) -> Value {
    match record {
        Value::Object(mut map) => {
            for (key, value) in sdc_fields {
                map.insert(key.clone(), value.clone());
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// An access denial is recognizable anywhere in the error chain by its
/// classified API error, regardless of added context.
fn is_access_denied(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(ApiError::AccessDenied(_)))
}
