//! Singer messages and the JSON-lines writer.
//!
//! A tap's observable output is a sequence of SCHEMA, RECORD and STATE
//! messages, one JSON object per line on stdout. Emission goes through
//! the [`MessageSink`] trait so the sync loop can be driven against a
//! recording sink in tests.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "SCHEMA")]
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bookmark_properties: Option<Vec<String>>,
    },
    #[serde(rename = "RECORD")]
    Record {
        stream: String,
        record: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_extracted: Option<String>,
    },
    #[serde(rename = "STATE")]
    State { value: Value },
}

impl Message {
    pub fn schema(
        stream: &str,
        schema: Value,
        key_properties: &[String],
        bookmark_properties: Option<Vec<String>>,
    ) -> Self {
        Message::Schema {
            stream: stream.to_string(),
            schema,
            key_properties: key_properties.to_vec(),
            bookmark_properties,
        }
    }

    /// A record stamped with its extraction time, serialized as RFC 3339
    /// UTC with microsecond precision.
    pub fn record(stream: &str, record: Value, time_extracted: DateTime<Utc>) -> Self {
        Message::Record {
            stream: stream.to_string(),
            record,
            time_extracted: Some(
                time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
        }
    }

    pub fn state(value: Value) -> Self {
        Message::State { value }
    }
}

/// Destination for emitted messages.
pub trait MessageSink {
    fn write(&mut self, message: &Message) -> anyhow::Result<()>;
}

/// Writes messages as newline-delimited JSON, flushing after each one so
/// downstream consumers see progress as it happens. A write failure is
/// fatal to the run; the sync loop never proceeds past an unflushed
/// checkpoint.
pub struct MessageWriter<W: Write> {
    out: W,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> MessageSink for MessageWriter<W> {
    fn write(&mut self, message: &Message) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
