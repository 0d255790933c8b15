//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: structs travel as maps keyed by field
//! name, so package heads stay readable by peers that don't share our field
//! order.
//!
//! # Example
//!
//! ```
//! use easycall::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct GetUser {
//!     uid: u64,
//!     name: String,
//! }
//!
//! let req = GetUser { uid: 42, name: "easy".to_string() };
//! let encoded = MsgPackCodec::encode(&req).unwrap();
//! let decoded: GetUser = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, req);
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
