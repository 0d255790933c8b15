//! Package struct: one wire unit made of a head and a body.
//!
//! The head is a small structured record (service, method, sequence number,
//! return code, message) encoded with the same [`BodyFormat`] as the body.
//! The body is kept as opaque `bytes::Bytes` so routing never pays for
//! deserializing a payload it only forwards.
//!
//! # Example
//!
//! ```
//! use easycall::codec::BodyFormat;
//! use easycall::protocol::{Package, PackageHead};
//!
//! let head = PackageHead::request("user", "getProfile", 7);
//! let pkg = Package::with_body(BodyFormat::Json, head, &("uid", 42)).unwrap();
//!
//! let bytes = pkg.encode().unwrap();
//! let decoded = Package::decode(bytes).unwrap();
//! assert_eq!(decoded.head.method, "getProfile");
//! assert_eq!(decoded.head.seq, 7);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::wire_format::{ret, Prefix, ETX, PREFIX_SIZE, TRAILER_SIZE};
use crate::codec::BodyFormat;
use crate::error::{EasycallError, Result};

/// Package head.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHead {
    /// Target service name.
    #[serde(default)]
    pub service: String,
    /// Target method name, matched exactly against the service's method table.
    pub method: String,
    /// Correlation key linking a response to its pending call.
    #[serde(default)]
    pub seq: u64,
    /// Return code (see [`ret`]).
    #[serde(default)]
    pub ret: i32,
    /// Human readable message accompanying a non-zero return code.
    #[serde(default)]
    pub msg: String,
}

impl PackageHead {
    /// Head for an outgoing request.
    pub fn request(service: &str, method: &str, seq: u64) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            seq,
            ret: ret::OK,
            msg: String::new(),
        }
    }

    /// Set the return code.
    pub fn set_ret(&mut self, code: i32) {
        self.ret = code;
    }

    /// Set the message.
    pub fn set_msg(&mut self, msg: impl Into<String>) {
        self.msg = msg.into();
    }

    /// Check if the return code signals success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.ret == ret::OK
    }
}

/// A complete protocol package.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Encoding used for head and body.
    pub format: BodyFormat,
    /// Decoded head.
    pub head: PackageHead,
    /// Encoded body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Package {
    /// Create a package from already-encoded body bytes.
    pub fn new(format: BodyFormat, head: PackageHead, body: Bytes) -> Self {
        Self { format, head, body }
    }

    /// Create a package whose body is `value` encoded with `format`.
    pub fn with_body<T: Serialize + ?Sized>(
        format: BodyFormat,
        head: PackageHead,
        value: &T,
    ) -> Result<Self> {
        let body = format.encode(value)?;
        Ok(Self { format, head, body })
    }

    /// Decode the body into a typed value.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.format.decode(&self.body)
    }

    /// Encode the package to its wire form.
    ///
    /// An empty body is sent as an encoded empty map.
    pub fn encode(&self) -> Result<Bytes> {
        let head = self.format.encode(&self.head)?;
        let body = if self.body.is_empty() {
            self.format.empty_body()
        } else {
            self.body.clone()
        };

        let head_len = u32::try_from(head.len())
            .map_err(|_| EasycallError::Protocol("Package head too large".to_string()))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| EasycallError::Protocol("Package body too large".to_string()))?;

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + head.len() + body.len() + TRAILER_SIZE);
        buf.put_slice(&Prefix::new(self.format.as_u8(), head_len, body_len).encode());
        buf.put_slice(&head);
        buf.put_slice(&body);
        buf.put_u8(ETX);
        Ok(buf.freeze())
    }

    /// Decode one complete package.
    ///
    /// The body is sliced out of `data` without copying.
    pub fn decode(data: Bytes) -> Result<Self> {
        let prefix = Prefix::decode(&data)?.ok_or_else(|| {
            EasycallError::Protocol(format!("Package too short: {} bytes", data.len()))
        })?;

        if prefix.package_len() != data.len() as u64 {
            return Err(EasycallError::Protocol(format!(
                "Package length mismatch: prefix says {}, got {}",
                prefix.package_len(),
                data.len()
            )));
        }

        if data[data.len() - 1] != ETX {
            return Err(EasycallError::Protocol("Bad end marker".to_string()));
        }

        let format = BodyFormat::try_from(prefix.format)?;
        let head_end = PREFIX_SIZE + prefix.head_len as usize;
        let body_end = head_end + prefix.body_len as usize;

        let head: PackageHead = format.decode(&data[PREFIX_SIZE..head_end])?;
        let body = data.slice(head_end..body_end);

        Ok(Self { format, head, body })
    }
}
