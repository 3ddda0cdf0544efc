//! Abstract serializer contract (spec §4, §6 "Serializer") plus the two
//! reference implementations the spec asks the core to ship for
//! testing the abstract contract: JSON (`serde_json`) and binary
//! (`bincode`). Concrete production codecs beyond these two are an
//! external collaborator's job per spec §1.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerdeError {
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, SerdeError>;

/// A named, deterministic serializer over byte buffers (spec §6:
/// `serialize(obj) -> bytes`, `deserialize(bytes, type) -> obj`,
/// `name()`). Implementations must satisfy
/// `deserialize(serialize(x)) == x` for every registered message type
/// (spec §8 round-trip law).
pub trait Serializer: Send + Sync {
    fn name(&self) -> &'static str;
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Reference JSON codec — human-readable, used by default for
/// transport headers and dev tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Reference binary codec — compact, used where wire size matters
/// (Redis Streams payloads, outbox record storage).
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Maps a codec failure onto the closed `ErrorCode` set (spec §7:
/// `SerializationFailed`).
impl From<SerdeError> for catga_core::ErrorCode {
    fn from(_: SerdeError) -> Self {
        catga_core::ErrorCode::SerializationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OrderCreated {
        order_id: String,
        qty: u32,
    }

    #[test]
    fn json_round_trips() {
        let s = JsonSerializer;
        let v = OrderCreated { order_id: "O1".into(), qty: 2 };
        let bytes = s.serialize(&v).unwrap();
        let back: OrderCreated = s.deserialize(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn bincode_round_trips() {
        let s = BincodeSerializer;
        let v = OrderCreated { order_id: "O2".into(), qty: 7 };
        let bytes = s.serialize(&v).unwrap();
        let back: OrderCreated = s.deserialize(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn json_serialization_is_deterministic_for_same_value() {
        let s = JsonSerializer;
        let v = OrderCreated { order_id: "O3".into(), qty: 1 };
        assert_eq!(s.serialize(&v).unwrap(), s.serialize(&v).unwrap());
    }

    #[test]
    fn malformed_bytes_surface_as_serde_error() {
        let s = JsonSerializer;
        let err = s.deserialize::<OrderCreated>(b"not json").unwrap_err();
        assert!(matches!(err, SerdeError::Json(_)));
    }
}
