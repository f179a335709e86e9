//! # Value Codec
//!
//! Stores never look inside values; they hand them to the configured codec
//! and move opaque bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SerializerKind;
use crate::error::SerializationError;

/// Encodes and decodes cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCodec {
    /// `bincode`: compact, not self-describing.
    CompactBinary,
    /// `serde_json`: self-describing, shape dictated by the serde type.
    SchemaBased,
}

impl ValueCodec {
    pub fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>, SerializationError> {
        match self {
            ValueCodec::CompactBinary => Ok(bincode::serialize(value)?),
            ValueCodec::SchemaBased => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, SerializationError> {
        match self {
            ValueCodec::CompactBinary => Ok(bincode::deserialize(bytes)?),
            ValueCodec::SchemaBased => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

impl From<SerializerKind> for ValueCodec {
    fn from(kind: SerializerKind) -> Self {
        match kind {
            SerializerKind::CompactBinary => ValueCodec::CompactBinary,
            SerializerKind::SchemaBased => ValueCodec::SchemaBased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn schema_based_writes_json() {
        let codec = ValueCodec::from(SerializerKind::SchemaBased);
        let bytes = codec
            .encode(&User { id: 42, name: "Alice".into() })
            .unwrap();
        assert_eq!(bytes, br#"{"id":42,"name":"Alice"}"#);
    }

    #[test]
    fn compact_binary_is_smaller_than_json() {
        let user = User { id: 42, name: "Alice".into() };
        let binary = ValueCodec::CompactBinary.encode(&user).unwrap();
        let json = ValueCodec::SchemaBased.encode(&user).unwrap();
        assert!(binary.len() < json.len());
        let decoded: User = ValueCodec::CompactBinary.decode(&binary).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn decode_garbage_is_serialization_error() {
        let result: Result<User, _> = ValueCodec::SchemaBased.decode(b"not json");
        assert!(matches!(result, Err(SerializationError::Json(_))));
    }
}
