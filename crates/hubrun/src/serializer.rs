//! Object serialization used for arguments and results.
//!
//! A serializer is a marker type; hubs are generic over it so that argument
//! decoding is monomorphised per handler. A null value travels as an empty
//! buffer, and an empty buffer decodes as null.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;

pub trait Serializer: Send + Sync + 'static {
    /// The format's own encoding of null / unit / `None`.
    const NIL: &'static [u8];

    fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;

    /// Serializes a value, mapping null to an empty buffer.
    fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        let bytes = Self::to_bytes(value)?;
        if bytes == Self::NIL {
            return Ok(Vec::new());
        }
        Ok(bytes)
    }

    /// Deserializes a value, reading an empty buffer as null.
    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        match bytes.is_empty() {
            true => Self::from_bytes(Self::NIL),
            false => Self::from_bytes(bytes),
        }
    }
}

/// MessagePack with named struct fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePack;

impl Serializer for MessagePack {
    const NIL: &'static [u8] = &[0xc0];

    fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Serializer for Json {
    const NIL: &'static [u8] = b"null";

    fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    fn nil_handling<S: Serializer>() {
        assert!(S::serialize(&()).unwrap().is_empty());
        assert!(S::serialize(&Option::<u32>::None).unwrap().is_empty());
        assert_eq!(S::deserialize::<Option<String>>(&[]).unwrap(), None);
        assert!(S::deserialize::<()>(&[]).is_ok());
        assert!(S::deserialize::<String>(&[]).is_err());
    }

    fn values<S: Serializer>() {
        let p = Payload { name: "x".into(), count: 3 };
        let bytes = S::serialize(&p).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(S::deserialize::<Payload>(&bytes).unwrap(), p);
        assert_eq!(S::deserialize::<Option<u32>>(&S::serialize(&Some(7u32)).unwrap()).unwrap(), Some(7));
    }

    #[test]
    fn msgpack_nil() {
        nil_handling::<MessagePack>();
    }

    #[test]
    fn msgpack_values() {
        values::<MessagePack>();
    }

    #[test]
    fn json_nil() {
        nil_handling::<Json>();
    }

    #[test]
    fn json_values() {
        values::<Json>();
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let bytes = MessagePack::serialize(&"text").unwrap();
        match MessagePack::deserialize::<u64>(&bytes) {
            Err(Error::Serialization(_)) => {}
            other => panic!("Expected Serialization error, got {:?}", other),
        }
    }
}
