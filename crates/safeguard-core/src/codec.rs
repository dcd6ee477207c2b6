//! Payload serialization for cached idempotency results.
//!
//! The facade bridges the caller's typed result through
//! [`serde_json::Value`], so the codec trait stays object-safe while any
//! serde-serializable result can be cached and replayed. The codec decides
//! the byte representation; [`JsonPayloadCodec`] stores canonical JSON and
//! [`NoopPayloadCodec`] disables caching entirely (callers that do not
//! need result replay pay nothing).

use bytes::Bytes;
use serde_json::Value;

use crate::error::{SafeguardError, SafeguardResult};

/// Serializes and deserializes the business result cached by the
/// idempotency guard. Pluggable; not part of the hard core.
pub trait PayloadCodec: Send + Sync {
    /// Encodes a value for storage. Returning `Ok(None)` disables replay
    /// caching for this result.
    fn serialize(&self, value: &Value) -> SafeguardResult<Option<Bytes>>;

    /// Decodes stored bytes back into a value. The `type_hint` is the
    /// diagnostic type name recorded at save time, when one was.
    fn deserialize(&self, bytes: &[u8], type_hint: Option<&str>) -> SafeguardResult<Value>;
}

/// A codec that caches nothing.
///
/// Replayed calls then surface
/// [`IdempotencyReplay`](crate::SafeguardError::IdempotencyReplay) instead
/// of a decoded value; the exactly-once guarantee is unaffected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPayloadCodec;

impl PayloadCodec for NoopPayloadCodec {
    fn serialize(&self, _value: &Value) -> SafeguardResult<Option<Bytes>> {
        Ok(None)
    }

    fn deserialize(&self, _bytes: &[u8], _type_hint: Option<&str>) -> SafeguardResult<Value> {
        Ok(Value::Null)
    }
}

/// JSON codec: payloads are stored as compact JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn serialize(&self, value: &Value) -> SafeguardResult<Option<Bytes>> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| SafeguardError::codec_with_source("failed to encode payload", e))?;
        Ok(Some(Bytes::from(bytes)))
    }

    fn deserialize(&self, bytes: &[u8], _type_hint: Option<&str>) -> SafeguardResult<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| SafeguardError::codec_with_source("failed to decode payload", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonPayloadCodec;
        let value = serde_json::json!({"orderId": "abc", "amount": 42});
        let bytes = codec.serialize(&value).unwrap().expect("json codec always encodes");
        let back = codec.deserialize(&bytes, None).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let codec = JsonPayloadCodec;
        let err = codec.deserialize(b"not json", None).unwrap_err();
        assert_eq!(err.code(), "CODEC_ERROR");
    }

    #[test]
    fn noop_codec_caches_nothing() {
        let codec = NoopPayloadCodec;
        assert_eq!(codec.serialize(&serde_json::json!(1)).unwrap(), None);
        assert_eq!(codec.deserialize(b"ignored", None).unwrap(), Value::Null);
    }
}
