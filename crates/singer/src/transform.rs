//! Schema-driven record shaping applied before emission.
//!
//! Raw API records pass through the transformer exactly once: fields the
//! catalog marks unsupported are dropped, fields the schema does not
//! declare are dropped, and timestamp representations are normalized so
//! downstream loaders only ever see calendar timestamps in `date-time`
//! fields.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::metadata::MetadataMap;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("field '{field}' holds epoch value {value} outside the representable timestamp range")]
    EpochOutOfRange { field: String, value: i64 },
}

/// How integer values found in `date-time` fields are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegerDatetimeParsing {
    /// Leave integers untouched.
    #[default]
    NoParsing,
    /// Read integers as Unix epoch seconds and rewrite them as RFC 3339.
    UnixSeconds,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    integer_datetime_parsing: IntegerDatetimeParsing,
}

impl Transformer {
    pub fn new(integer_datetime_parsing: IntegerDatetimeParsing) -> Self {
        Self {
            integer_datetime_parsing,
        }
    }

    /// Shapes one record against its stream's schema and metadata.
    pub fn transform(
        &self,
        record: Value,
        schema: &Value,
        metadata: &MetadataMap,
    ) -> Result<Value, TransformError> {
        let Value::Object(fields) = record else {
            return Err(TransformError::NotAnObject);
        };
        let properties = schema.get("properties").and_then(Value::as_object);

        let mut out = Map::new();
        for (name, value) in fields {
            if metadata.is_unsupported(&name) {
                continue;
            }
            let Some(field_schema) = properties.and_then(|props| props.get(&name)) else {
                continue;
            };
            let shaped = self.transform_value(value, field_schema, &name)?;
            out.insert(name, shaped);
        }
        Ok(Value::Object(out))
    }

    fn transform_value(
        &self,
        value: Value,
        schema: &Value,
        field: &str,
    ) -> Result<Value, TransformError> {
        if value.is_null() {
            return Ok(value);
        }
        if is_datetime(schema) {
            return self.transform_datetime(value, field);
        }
        match value {
            Value::Object(inner) => {
                let Some(properties) = schema.get("properties").and_then(Value::as_object)
                else {
                    return Ok(Value::Object(inner));
                };
                let mut out = Map::new();
                for (name, value) in inner {
                    if let Some(nested) = properties.get(&name) {
                        let shaped = self.transform_value(value, nested, field)?;
                        out.insert(name, shaped);
                    }
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let Some(item_schema) = schema.get("items") else {
                    return Ok(Value::Array(items));
                };
                let shaped = items
                    .into_iter()
                    .map(|item| self.transform_value(item, item_schema, field))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(shaped))
            }
            other => Ok(other),
        }
    }

    fn transform_datetime(&self, value: Value, field: &str) -> Result<Value, TransformError> {
        match value {
            Value::Number(n)
                if self.integer_datetime_parsing == IntegerDatetimeParsing::UnixSeconds =>
            {
                let Some(secs) = n.as_i64() else {
                    return Ok(Value::Number(n));
                };
                let ts = DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
                    TransformError::EpochOutOfRange {
                        field: field.to_string(),
                        value: secs,
                    }
                })?;
                Ok(Value::String(
                    ts.to_rfc3339_opts(SecondsFormat::Micros, true),
                ))
            }
            // Conforming timestamp strings are re-serialized in UTC so one
            // representation reaches the loader; anything else passes
            // through for the target schema to judge.
            Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(ts) => Ok(Value::String(
                    ts.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Micros, true),
                )),
                Err(_) => Ok(Value::String(s)),
            },
            other => Ok(other),
        }
    }
}

fn is_datetime(schema: &Value) -> bool {
    schema.get("format").and_then(Value::as_str) == Some("date-time")
}
