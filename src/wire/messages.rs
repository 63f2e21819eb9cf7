use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-key operation code carried in a coordinator→node batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    Get,
    Put,
    TestSet,
    Query,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOp {
    pub opcode: Opcode,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub test_value: String,
    #[serde(default)]
    pub new_value: String,
}

impl KeyOp {
    pub fn get() -> Self {
        Self::new(Opcode::Get)
    }

    pub fn query() -> Self {
        Self::new(Opcode::Query)
    }

    pub fn put(version: u64, new_value: impl Into<String>) -> Self {
        KeyOp {
            version,
            new_value: new_value.into(),
            ..Self::new(Opcode::Put)
        }
    }

    pub fn test_set(version: u64, test_value: impl Into<String>, new_value: impl Into<String>) -> Self {
        KeyOp {
            version,
            test_value: test_value.into(),
            new_value: new_value.into(),
            ..Self::new(Opcode::TestSet)
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.opcode, Opcode::Put | Opcode::TestSet)
    }

    fn new(opcode: Opcode) -> Self {
        KeyOp {
            opcode,
            version: 0,
            test_value: String::new(),
            new_value: String::new(),
        }
    }
}

/// Coordinator→node batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatch {
    pub correlation_id: u64,
    #[serde(default)]
    pub keys: HashMap<String, KeyOp>,
    #[serde(default)]
    pub kill: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: u64,
    pub value: String,
}

impl VersionedValue {
    pub fn new(version: u64, value: impl Into<String>) -> Self {
        VersionedValue {
            version,
            value: value.into(),
        }
    }
}

/// Node→coordinator batch. The coordinator also synthesizes these locally (with `unavailable`
/// set) for replicas that can no longer be reached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBatch {
    pub correlation_id: u64,
    #[serde(default)]
    pub values: HashMap<String, VersionedValue>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub kill: bool,
}

impl ResponseBatch {
    pub fn unavailable() -> Self {
        ResponseBatch {
            unavailable: true,
            ..ResponseBatch::default()
        }
    }
}

pub(crate) fn encode_message<T: Serialize>(message: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(message).map(Bytes::from)
}

pub(crate) fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_batch_wire_shape() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), KeyOp::test_set(7, "", "x"));
        let batch = RequestBatch {
            correlation_id: 3,
            keys,
            kill: false,
        };

        let json: serde_json::Value = serde_json::from_slice(&encode_message(&batch).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "correlationId": 3,
                "keys": {"a": {"opcode": "TestSet", "version": 7, "testValue": "", "newValue": "x"}},
                "kill": false
            })
        );
    }

    #[test]
    fn response_batch_tolerates_missing_fields() {
        // A kill acknowledgement carries no values.
        let decoded: ResponseBatch = decode_message(br#"{"correlationId": 9, "kill": true}"#).unwrap();
        assert_eq!(decoded.correlation_id, 9);
        assert!(decoded.kill);
        assert!(!decoded.unavailable);
        assert!(decoded.values.is_empty());
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_message::<RequestBatch>(b"not json").is_err());
    }
}
