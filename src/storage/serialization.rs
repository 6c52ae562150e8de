//! Payload serialization.
//!
//! JSON is always available. The legacy binary format exists so older stores
//! stay readable; it needs the `legacy-binary` feature, only decodes payloads
//! carrying its header, and logs a warning on every use. MessagePack needs the
//! `msgpack` feature.

use serde_json::Value;

use super::SerializationFormat;
use crate::error::{StorageError, StorageResult};

/// Serialize a value in the given format.
pub fn serialize(format: SerializationFormat, value: &Value) -> StorageResult<Vec<u8>> {
    match format {
        SerializationFormat::Json => {
            serde_json::to_vec(value).map_err(|e| serialization_error(format, e))
        }
        SerializationFormat::LegacyBinary => legacy::encode(value),
        SerializationFormat::Msgpack => msgpack::encode(value),
    }
}

/// Deserialize bytes written in the given format.
pub fn deserialize(format: SerializationFormat, bytes: &[u8]) -> StorageResult<Value> {
    match format {
        SerializationFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| serialization_error(format, e))
        }
        SerializationFormat::LegacyBinary => legacy::decode(bytes),
        SerializationFormat::Msgpack => msgpack::decode(bytes),
    }
}

fn serialization_error(format: SerializationFormat, e: impl std::fmt::Display) -> StorageError {
    StorageError::Serialization {
        format: format.to_string(),
        message: e.to_string(),
    }
}

#[cfg(feature = "legacy-binary")]
mod legacy {
    use bincode::Options;
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Number, Value};
    use tracing::warn;

    use super::serialization_error;
    use crate::error::{StorageError, StorageResult};
    use crate::storage::SerializationFormat;

    const MAGIC: &[u8; 4] = b"GQLB";
    const VERSION: u8 = 1;
    const HEADER_LEN: usize = MAGIC.len() + 1;
    /// Upper bound on decoded allocations.
    const SIZE_LIMIT: u64 = 256 * 1024 * 1024;

    /// Self-describing mirror of `serde_json::Value`; bincode cannot drive
    /// `Value`'s own `Deserialize`.
    #[derive(Debug, Serialize, Deserialize)]
    enum LegacyValue {
        Null,
        Bool(bool),
        I64(i64),
        U64(u64),
        F64(f64),
        Str(String),
        Array(Vec<LegacyValue>),
        Object(Vec<(String, LegacyValue)>),
    }

    impl From<&Value> for LegacyValue {
        fn from(value: &Value) -> Self {
            match value {
                Value::Null => LegacyValue::Null,
                Value::Bool(b) => LegacyValue::Bool(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        LegacyValue::I64(i)
                    } else if let Some(u) = n.as_u64() {
                        LegacyValue::U64(u)
                    } else {
                        LegacyValue::F64(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => LegacyValue::Str(s.clone()),
                Value::Array(items) => LegacyValue::Array(items.iter().map(Self::from).collect()),
                Value::Object(map) => LegacyValue::Object(
                    map.iter().map(|(k, v)| (k.clone(), Self::from(v))).collect(),
                ),
            }
        }
    }

    impl From<LegacyValue> for Value {
        fn from(value: LegacyValue) -> Self {
            match value {
                LegacyValue::Null => Value::Null,
                LegacyValue::Bool(b) => Value::Bool(b),
                LegacyValue::I64(i) => Value::from(i),
                LegacyValue::U64(u) => Value::from(u),
                LegacyValue::F64(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
                LegacyValue::Str(s) => Value::String(s),
                LegacyValue::Array(items) => {
                    Value::Array(items.into_iter().map(Value::from).collect())
                }
                LegacyValue::Object(entries) => Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, Value::from(v)))
                        .collect::<Map<String, Value>>(),
                ),
            }
        }
    }

    fn options() -> impl Options {
        bincode::DefaultOptions::new().with_limit(SIZE_LIMIT)
    }

    pub(super) fn encode(value: &Value) -> StorageResult<Vec<u8>> {
        warn!("Serializing with the legacy binary format; json is recommended");
        let body = options()
            .serialize(&LegacyValue::from(value))
            .map_err(|e| serialization_error(SerializationFormat::LegacyBinary, e))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub(super) fn decode(bytes: &[u8]) -> StorageResult<Value> {
        warn!("Deserializing legacy binary data; only load payloads this service wrote");
        validate_header(bytes)?;
        let legacy: LegacyValue = options()
            .deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| serialization_error(SerializationFormat::LegacyBinary, e))?;
        Ok(Value::from(legacy))
    }

    fn validate_header(bytes: &[u8]) -> StorageResult<()> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(StorageError::Validation {
                message: "Payload is not in the legacy binary format".into(),
            });
        }
        if bytes[MAGIC.len()] != VERSION {
            return Err(StorageError::Validation {
                message: format!(
                    "Unsupported legacy binary version {}",
                    bytes[MAGIC.len()]
                ),
            });
        }
        Ok(())
    }
}

#[cfg(not(feature = "legacy-binary"))]
mod legacy {
    use serde_json::Value;

    use crate::error::{StorageError, StorageResult};

    fn unavailable() -> StorageError {
        StorageError::FormatUnavailable {
            format: "legacy_binary".into(),
            hint: "build with the `legacy-binary` feature".into(),
        }
    }

    pub(super) fn encode(_value: &Value) -> StorageResult<Vec<u8>> {
        Err(unavailable())
    }

    pub(super) fn decode(_bytes: &[u8]) -> StorageResult<Value> {
        Err(unavailable())
    }
}

#[cfg(feature = "msgpack")]
mod msgpack {
    use serde_json::Value;

    use super::serialization_error;
    use crate::error::StorageResult;
    use crate::storage::SerializationFormat;

    pub(super) fn encode(value: &Value) -> StorageResult<Vec<u8>> {
        rmp_serde::to_vec_named(value)
            .map_err(|e| serialization_error(SerializationFormat::Msgpack, e))
    }

    pub(super) fn decode(bytes: &[u8]) -> StorageResult<Value> {
        rmp_serde::from_slice(bytes).map_err(|e| serialization_error(SerializationFormat::Msgpack, e))
    }
}

#[cfg(not(feature = "msgpack"))]
mod msgpack {
    use serde_json::Value;

    use crate::error::{StorageError, StorageResult};

    fn unavailable() -> StorageError {
        StorageError::FormatUnavailable {
            format: "msgpack".into(),
            hint: "build with the `msgpack` feature".into(),
        }
    }

    pub(super) fn encode(_value: &Value) -> StorageResult<Vec<u8>> {
        Err(unavailable())
    }

    pub(super) fn decode(_bytes: &[u8]) -> StorageResult<Value> {
        Err(unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn sample() -> Value {
        json!({
            "user": {"id": 42, "name": "Ada", "score": -3, "ratio": 0.5},
            "tags": ["a", "b", null, true],
            "big": u64::MAX,
        })
    }

    #[test]
    fn test_json_round_trip() {
        let bytes = serialize(SerializationFormat::Json, &sample()).unwrap();
        assert_eq!(deserialize(SerializationFormat::Json, &bytes).unwrap(), sample());
    }

    #[test]
    fn test_json_rejects_garbage() {
        let err = deserialize(SerializationFormat::Json, b"{not json").unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[cfg(feature = "legacy-binary")]
    #[test]
    fn test_legacy_round_trip_and_header() {
        let bytes = serialize(SerializationFormat::LegacyBinary, &sample()).unwrap();
        assert!(bytes.starts_with(b"GQLB"));
        assert_eq!(
            deserialize(SerializationFormat::LegacyBinary, &bytes).unwrap(),
            sample()
        );
    }

    #[cfg(feature = "legacy-binary")]
    #[traced_test]
    #[test]
    fn test_legacy_warns_on_every_call() {
        let bytes = serialize(SerializationFormat::LegacyBinary, &sample()).unwrap();
        serialize(SerializationFormat::LegacyBinary, &json!([1, 2])).unwrap();
        deserialize(SerializationFormat::LegacyBinary, &bytes).unwrap();
        deserialize(SerializationFormat::LegacyBinary, &bytes).unwrap();

        logs_assert(|lines: &[&str]| {
            let encodes = lines
                .iter()
                .filter(|l| l.contains("WARN") && l.contains("Serializing with the legacy binary"))
                .count();
            let decodes = lines
                .iter()
                .filter(|l| l.contains("WARN") && l.contains("Deserializing legacy binary"))
                .count();
            match (encodes, decodes) {
                (2, 2) => Ok(()),
                other => Err(format!("expected (2, 2) warnings, got {:?}", other)),
            }
        });
    }

    #[traced_test]
    #[test]
    fn test_json_does_not_warn() {
        let bytes = serialize(SerializationFormat::Json, &sample()).unwrap();
        deserialize(SerializationFormat::Json, &bytes).unwrap();
        assert!(!logs_contain("legacy binary"));
    }

    #[cfg(not(feature = "legacy-binary"))]
    #[test]
    fn test_legacy_unavailable() {
        let err = serialize(SerializationFormat::LegacyBinary, &sample()).unwrap_err();
        assert!(matches!(err, StorageError::FormatUnavailable { .. }));
        let err = deserialize(SerializationFormat::LegacyBinary, b"GQLB\x01").unwrap_err();
        assert!(err.to_string().contains("legacy-binary"));
    }

    #[cfg(feature = "legacy-binary")]
    #[test]
    fn test_legacy_rejects_foreign_payload() {
        let err = deserialize(SerializationFormat::LegacyBinary, b"{\"a\":1}").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));

        let mut bytes = serialize(SerializationFormat::LegacyBinary, &sample()).unwrap();
        bytes[4] = 9;
        let err = deserialize(SerializationFormat::LegacyBinary, &bytes).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[cfg(feature = "legacy-binary")]
    #[test]
    fn test_legacy_rejects_truncated_body() {
        let bytes = serialize(SerializationFormat::LegacyBinary, &sample()).unwrap();
        let err = deserialize(SerializationFormat::LegacyBinary, &bytes[..bytes.len() / 2])
            .unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn test_msgpack_round_trip() {
        let bytes = serialize(SerializationFormat::Msgpack, &sample()).unwrap();
        assert_eq!(deserialize(SerializationFormat::Msgpack, &bytes).unwrap(), sample());
    }

    #[cfg(not(feature = "msgpack"))]
    #[test]
    fn test_msgpack_unavailable() {
        let err = serialize(SerializationFormat::Msgpack, &sample()).unwrap_err();
        assert!(matches!(err, StorageError::FormatUnavailable { .. }));
        assert!(err.to_string().contains("not installed"));
    }
}
