// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::io::Write;

use crate::error::SerializationError;

/// Newline delimited JSON accumulated for the current shipment.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    data: Vec<u8>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` as one compact JSON line.
    ///
    /// The record is fully encoded before anything is appended, so a failing record
    /// leaves the lines written before it untouched.
    pub fn write<T>(&mut self, record: &T) -> Result<(), SerializationError>
    where
        T: Serialize + ?Sized,
    {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.data.write_all(&line)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops the buffered lines. The allocation is kept for the next shipment.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::PendingBuffer;
    use crate::error::SerializationError;
    use serde::{Serialize, Serializer};
    use serde_json::json;
    use std::collections::HashMap;

    struct Handle;

    impl Serialize for Handle {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("handles have no encoding"))
        }
    }

    #[test]
    fn test_write_appends_lines() {
        let mut buffer = PendingBuffer::new();
        buffer.write(&json!({"a": 1})).unwrap();
        buffer.write(&json!({"b": "two"})).unwrap();
        assert_eq!(buffer.as_bytes(), b"{\"a\":1}\n{\"b\":\"two\"}\n");
    }

    #[test]
    fn test_write_nil_bytes_and_string() {
        let mut buffer = PendingBuffer::new();
        buffer.write(&Option::<()>::None).unwrap();
        buffer.write(&b"raw".to_vec()).unwrap();
        buffer.write("plain string").unwrap();
        assert_eq!(
            buffer.as_bytes(),
            b"null\n[114,97,119]\n\"plain string\"\n"
        );
    }

    #[test]
    fn test_unserializable_record_keeps_existing_content() {
        let mut buffer = PendingBuffer::new();
        buffer.write(&json!({"kept": true})).unwrap();

        let result = buffer.write(&Handle);
        assert!(matches!(result, Err(SerializationError::Encode(_))));

        let non_string_keys = HashMap::from([((1, 2), "value")]);
        assert!(buffer.write(&non_string_keys).is_err());

        assert_eq!(buffer.as_bytes(), b"{\"kept\":true}\n");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut buffer = PendingBuffer::new();
        buffer.write(&json!({"a": 1})).unwrap();
        assert!(!buffer.is_empty());

        buffer.clear();
        assert_eq!(buffer.len(), 0);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }
}
