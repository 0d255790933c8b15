//! Codec module - body encodings selected by the package format tag.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! [`BodyFormat`] is the tag carried in every package; it picks the codec for
//! both the head and the body of that package, and a response always reuses
//! the format of the request it answers.
//!
//! # Example
//!
//! ```
//! use easycall::codec::BodyFormat;
//!
//! let encoded = BodyFormat::Json.encode(&"hello").unwrap();
//! assert_eq!(&encoded[..], b"\"hello\"");
//! let decoded: String = BodyFormat::Json.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EasycallError, Result};

/// Body encoding tag carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BodyFormat {
    /// MessagePack (tag 0).
    #[default]
    MsgPack = 0,
    /// JSON (tag 1).
    Json = 1,
}

impl BodyFormat {
    /// Convert from the wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BodyFormat::MsgPack),
            1 => Some(BodyFormat::Json),
            _ => None,
        }
    }

    /// Wire tag for this format.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Encode a value with this format.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        let data = match self {
            BodyFormat::MsgPack => MsgPackCodec::encode(value)?,
            BodyFormat::Json => JsonCodec::encode(value)?,
        };
        Ok(Bytes::from(data))
    }

    /// Decode a value with this format.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            BodyFormat::MsgPack => MsgPackCodec::decode(bytes),
            BodyFormat::Json => JsonCodec::decode(bytes),
        }
    }

    /// Encoded form of an empty map, used when a package carries no body.
    pub fn empty_body(self) -> Bytes {
        match self {
            BodyFormat::MsgPack => Bytes::from_static(&[0x80]),
            BodyFormat::Json => Bytes::from_static(b"{}"),
        }
    }
}

impl TryFrom<u8> for BodyFormat {
    type Error = EasycallError;

    fn try_from(tag: u8) -> Result<Self> {
        BodyFormat::from_u8(tag)
            .ok_or_else(|| EasycallError::Protocol(format!("Unknown body format tag {}", tag)))
    }
}

/// Map-like body used when a caller doesn't have a typed payload.
pub type BodyMap = BTreeMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tags() {
        assert_eq!(BodyFormat::from_u8(0), Some(BodyFormat::MsgPack));
        assert_eq!(BodyFormat::from_u8(1), Some(BodyFormat::Json));
        assert_eq!(BodyFormat::from_u8(7), None);
        assert!(BodyFormat::try_from(9).is_err());
        assert_eq!(BodyFormat::default(), BodyFormat::MsgPack);
    }

    #[test]
    fn test_empty_body_decodes_as_empty_map() {
        for format in [BodyFormat::MsgPack, BodyFormat::Json] {
            let map: BodyMap = format.decode(&format.empty_body()).unwrap();
            assert!(map.is_empty());
        }
    }

    #[test]
    fn test_body_map_across_formats() {
        let mut map = BodyMap::new();
        map.insert("uid".to_string(), serde_json::json!(42));
        map.insert("name".to_string(), serde_json::json!("easy"));

        for format in [BodyFormat::MsgPack, BodyFormat::Json] {
            let encoded = format.encode(&map).unwrap();
            let decoded: BodyMap = format.decode(&encoded).unwrap();
            assert_eq!(decoded, map);
        }
    }
}
