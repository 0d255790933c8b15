//! Wire format encoding and decoding.
//!
//! Every package is length-delimited by a fixed 10-byte prefix and closed by a
//! single trailer byte:
//! ```text
//! ┌──────┬────────┬──────────┬──────────┬──────┬──────┬──────┐
//! │ STX  │ Format │ Head len │ Body len │ Head │ Body │ ETX  │
//! │ 0x02 │ 1 byte │ u32 BE   │ u32 BE   │      │      │ 0x03 │
//! └──────┴────────┴──────────┴──────────┴──────┴──────┴──────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{EasycallError, Result};

/// Start-of-package marker.
pub const STX: u8 = 0x02;

/// End-of-package marker.
pub const ETX: u8 = 0x03;

/// Prefix size in bytes (fixed, exactly 10).
pub const PREFIX_SIZE: usize = 10;

/// Trailer size in bytes.
pub const TRAILER_SIZE: usize = 1;

/// Default maximum size of one package, prefix and trailer included (16 MB).
pub const DEFAULT_MAX_PACKAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Return codes carried in the package head.
pub mod ret {
    /// Call succeeded.
    pub const OK: i32 = 0;
    /// No method with the requested name is exposed by the service.
    pub const METHOD_NOT_FOUND: i32 = 1001;
    /// The method ran and reported a failure.
    pub const SERVICE_FAILURE: i32 = 1002;
    /// The request body could not be decoded into the method's input.
    pub const BAD_REQUEST: i32 = 1003;
}

/// Decoded package prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Body format tag (see [`BodyFormat`](crate::codec::BodyFormat)).
    pub format: u8,
    /// Encoded head length in bytes.
    pub head_len: u32,
    /// Encoded body length in bytes.
    pub body_len: u32,
}

impl Prefix {
    /// Create a new prefix.
    pub fn new(format: u8, head_len: u32, body_len: u32) -> Self {
        Self {
            format,
            head_len,
            body_len,
        }
    }

    /// Encode prefix to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use easycall::protocol::Prefix;
    ///
    /// let bytes = Prefix::new(1, 20, 100).encode();
    /// assert_eq!(bytes.len(), 10);
    /// assert_eq!(bytes[0], 0x02);
    /// ```
    pub fn encode(&self) -> [u8; PREFIX_SIZE] {
        let mut buf = [0u8; PREFIX_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode prefix into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `PREFIX_SIZE` (10 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= PREFIX_SIZE);
        buf[0] = STX;
        buf[1] = self.format;
        buf[2..6].copy_from_slice(&self.head_len.to_be_bytes());
        buf[6..10].copy_from_slice(&self.body_len.to_be_bytes());
    }

    /// Decode prefix from bytes.
    ///
    /// Returns `Ok(None)` if the buffer is too short and an error if the first
    /// byte is not [`STX`].
    ///
    /// # Example
    ///
    /// ```
    /// use easycall::protocol::Prefix;
    ///
    /// let bytes = [0x02, 0, 0, 0, 0, 5, 0, 0, 0, 1];
    /// let prefix = Prefix::decode(&bytes).unwrap().unwrap();
    /// assert_eq!(prefix.head_len, 5);
    /// assert_eq!(prefix.body_len, 1);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < PREFIX_SIZE {
            return Ok(None);
        }
        if buf[0] != STX {
            return Err(EasycallError::Protocol(format!(
                "Bad start marker 0x{:02X}",
                buf[0]
            )));
        }
        Ok(Some(Self {
            format: buf[1],
            head_len: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            body_len: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        }))
    }

    /// Total package length described by this prefix.
    #[inline]
    pub fn package_len(&self) -> u64 {
        PREFIX_SIZE as u64 + self.head_len as u64 + self.body_len as u64 + TRAILER_SIZE as u64
    }

    /// Validate the prefix against a maximum package size.
    pub fn validate(&self, max_package_size: u32) -> Result<()> {
        if self.head_len == 0 {
            return Err(EasycallError::Protocol("Package head is empty".to_string()));
        }

        if self.package_len() > max_package_size as u64 {
            return Err(EasycallError::Protocol(format!(
                "Package size {} exceeds maximum {}",
                self.package_len(),
                max_package_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_big_endian_byte_order() {
        let bytes = Prefix::new(0x01, 0x02030405, 0x06070809).encode();

        assert_eq!(bytes[0], STX);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..6], &[0x02, 0x03, 0x04, 0x05]);
        assert_eq!(&bytes[6..10], &[0x06, 0x07, 0x08, 0x09]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [STX; PREFIX_SIZE - 1];
        assert!(Prefix::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_start_marker() {
        let mut buf = Prefix::new(0, 1, 1).encode();
        buf[0] = 0x7F;
        let err = Prefix::decode(&buf).unwrap_err();
        assert!(err.to_string().contains("Bad start marker"));
    }

    #[test]
    fn test_package_len_counts_prefix_and_trailer() {
        let prefix = Prefix::new(0, 3, 4);
        assert_eq!(prefix.package_len(), (PREFIX_SIZE + 3 + 4 + TRAILER_SIZE) as u64);
    }

    #[test]
    fn test_validate_rejects_empty_head() {
        let result = Prefix::new(0, 0, 4).validate(DEFAULT_MAX_PACKAGE_SIZE);
        assert!(result.unwrap_err().to_string().contains("head is empty"));
    }

    #[test]
    fn test_validate_rejects_oversize() {
        let result = Prefix::new(0, 10, 1_000).validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));

        // u32::MAX lengths must not overflow the size check
        let huge = Prefix::new(0, u32::MAX, u32::MAX);
        assert!(huge.validate(u32::MAX).is_err());
    }
}
