//! Node metadata codec.
//!
//! Every state node carries a small self-describing JSON record. The codec
//! round-trips any Unicode file path, tolerates unknown fields for forward
//! compatibility, and rejects payloads that exceed the coordinator's
//! per-node limit before they ever reach the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// The coordinator's per-node payload limit.
pub const MAX_NODE_PAYLOAD: usize = 1 << 20;

/// The record attached to processing, failed, and cursor nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// The file path this record describes. For a cursor node, the greatest
    /// path durably processed in its bucket.
    #[serde(default)]
    pub file_path: String,

    /// The processing id of the claim that wrote this record, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_id: Option<String>,

    /// Retriable-failure attempts so far.
    #[serde(default)]
    pub retries: u32,

    /// Description of the most recent failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exception: Option<String>,
}

impl FileMetadata {
    /// Creates a record for the given file path.
    #[must_use]
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Serializes the record into a node payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PayloadTooLarge`] when the encoded record
    /// exceeds [`MAX_NODE_PAYLOAD`]; such values are a logic error at the
    /// call site, not a retryable condition.
    pub fn to_payload(&self) -> Result<Bytes> {
        let encoded = serde_json::to_vec(self).map_err(|e| QueueError::Serialization {
            message: format!("encode file metadata: {e}"),
        })?;
        if encoded.len() > MAX_NODE_PAYLOAD {
            return Err(QueueError::PayloadTooLarge {
                size: encoded.len(),
                limit: MAX_NODE_PAYLOAD,
            });
        }
        Ok(Bytes::from(encoded))
    }

    /// Deserializes a record from a node payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the payload is not a valid
    /// record. Unknown fields are ignored for forward compatibility.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Serialization {
            message: format!("decode file metadata: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut meta = FileMetadata::new("data/2024/part-00.parquet");
        meta.processing_id = Some("01H000000000000000000000AB".to_string());
        meta.retries = 2;
        meta.last_exception = Some("schema mismatch".to_string());

        let payload = meta.to_payload().expect("encode");
        let decoded = FileMetadata::from_payload(&payload).expect("decode");
        assert_eq!(meta, decoded);
    }

    #[test]
    fn test_roundtrip_unicode_path() {
        let meta = FileMetadata::new("ディレクトリ/ファイル \u{1F4C8}.csv");
        let payload = meta.to_payload().expect("encode");
        let decoded = FileMetadata::from_payload(&payload).expect("decode");
        assert_eq!(decoded.file_path, meta.file_path);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let payload = br#"{"file_path":"a.csv","retries":1,"added_in_v2":true}"#;
        let decoded = FileMetadata::from_payload(payload).expect("decode");
        assert_eq!(decoded.file_path, "a.csv");
        assert_eq!(decoded.retries, 1);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let payload = br#"{"file_path":"a.csv"}"#;
        let decoded = FileMetadata::from_payload(payload).expect("decode");
        assert_eq!(decoded.retries, 0);
        assert!(decoded.processing_id.is_none());
        assert!(decoded.last_exception.is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let meta = FileMetadata::new("x".repeat(MAX_NODE_PAYLOAD + 1));
        let result = meta.to_payload();
        assert!(matches!(result, Err(QueueError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_invalid_payload_is_serialization_error() {
        let result = FileMetadata::from_payload(b"not json");
        assert!(matches!(result, Err(QueueError::Serialization { .. })));
    }
}
