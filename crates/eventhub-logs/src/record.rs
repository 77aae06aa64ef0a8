// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flattening of Event Hub messages into loggable records.
//!
//! An Event Hub message is either a log record on its own, or a wrapper whose
//! `records` field carries a list of log records (the shape used by Azure
//! diagnostic settings). Wrappers are unwrapped one level deep; whatever sits
//! inside `records` is shipped as is.

use serde_json::Value;

use crate::buffer::PendingBuffer;
use crate::error::SerializationError;
use crate::execution_log::ExecutionLog;

const RECORDS_FIELD: &str = "records";

/// Shape of one decoded Event Hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Flat(Value),
    Wrapped(Vec<Value>),
}

impl TryFrom<Value> for EventRecord {
    type Error = SerializationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(SerializationError::Malformed(format!(
                    "expected a JSON object, got {}",
                    kind(&other)
                )))
            }
        };
        match fields.remove(RECORDS_FIELD) {
            None => Ok(EventRecord::Flat(Value::Object(fields))),
            Some(Value::Array(inner)) => Ok(EventRecord::Wrapped(inner)),
            // not a wrapper, the field is part of the record
            Some(other) => {
                fields.insert(RECORDS_FIELD.to_string(), other);
                Ok(EventRecord::Flat(Value::Object(fields)))
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Streams every loggable record of `raw_records` into `buffer`, in order.
///
/// A record that cannot be classified or encoded is reported to `log` and
/// skipped. Returns how many records made it into the buffer.
pub fn extract<I>(raw_records: I, buffer: &mut PendingBuffer, log: &mut ExecutionLog) -> usize
where
    I: IntoIterator<Item = Value>,
{
    let mut written = 0;
    for (index, raw) in raw_records.into_iter().enumerate() {
        match EventRecord::try_from(raw) {
            Ok(EventRecord::Flat(record)) => {
                written += write_record(&record, index, buffer, log);
            }
            Ok(EventRecord::Wrapped(inner)) => {
                for record in &inner {
                    written += write_record(record, index, buffer, log);
                }
            }
            Err(e) => log.error(format!("Skipping record {index}: {e}")),
        }
    }
    written
}

fn write_record(
    record: &Value,
    index: usize,
    buffer: &mut PendingBuffer,
    log: &mut ExecutionLog,
) -> usize {
    match buffer.write(record) {
        Ok(()) => 1,
        Err(e) => {
            log.error(format!("Skipping record {index}: {e}"));
            0
        }
    }
}
