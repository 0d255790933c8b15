//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented packages:
//! - `WaitingForPrefix`: Need at least 10 bytes
//! - `WaitingForRest`: Prefix parsed, need the whole package in the buffer
//!
//! The buffer only splits the stream; it hands out each complete package as
//! raw bytes and leaves decoding to the dispatcher, so one malformed head
//! costs one package rather than the connection.
//!
//! # Example
//!
//! ```ignore
//! use easycall::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from socket
//! for raw in buffer.push(&chunk)? {
//!     dispatcher.dispatch(raw, &conn);
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Prefix, DEFAULT_MAX_PACKAGE_SIZE};
use crate::error::Result;

/// State machine for package splitting.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete prefix (need 10 bytes).
    WaitingForPrefix,
    /// Prefix parsed, waiting until `total` bytes are buffered.
    WaitingForRest { total: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete packages.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed package size.
    max_package_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max package: 16MB.
    pub fn new() -> Self {
        Self::with_max_package(DEFAULT_MAX_PACKAGE_SIZE)
    }

    /// Create a new frame buffer with custom max package size.
    pub fn with_max_package(max_package_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForPrefix,
            max_package_size,
        }
    }

    /// Push data into the buffer and extract all complete packages.
    ///
    /// Returns packages in arrival order (may be empty if still waiting for
    /// data). Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on a bad start marker or an over-size package; the
    /// stream cannot be resynchronized after either.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut packages = Vec::new();

        while let Some(package) = self.try_extract_one()? {
            packages.push(package);
        }

        Ok(packages)
    }

    /// Try to extract a single package from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForPrefix => {
                let prefix = match Prefix::decode(&self.buffer)? {
                    Some(prefix) => prefix,
                    None => return Ok(None),
                };

                prefix.validate(self.max_package_size)?;

                // validate() bounds the length by a u32
                self.state = State::WaitingForRest {
                    total: prefix.package_len() as usize,
                };

                self.try_extract_one()
            }

            State::WaitingForRest { total } => {
                if self.buffer.len() < total {
                    return Ok(None);
                }

                let package = self.buffer.split_to(total).freeze();
                self.state = State::WaitingForPrefix;

                Ok(Some(package))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForRest { .. } => "WaitingForRest",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BodyFormat;
    use crate::protocol::{Package, PackageHead, PREFIX_SIZE};

    fn make_package_bytes(method: &str, seq: u64, body: &str) -> Bytes {
        Package::with_body(
            BodyFormat::MsgPack,
            PackageHead::request("svc", method, seq),
            body,
        )
        .unwrap()
        .encode()
        .unwrap()
    }

    fn method_of(raw: &Bytes) -> String {
        Package::decode(raw.clone()).unwrap().head.method
    }

    #[test]
    fn test_single_complete_package() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_package_bytes("hello", 42, "world");

        let packages = buffer.push(&bytes).unwrap();

        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0], bytes);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_packages_in_one_push_keep_order() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        for method in ["first", "second", "third"] {
            combined.extend_from_slice(&make_package_bytes(method, 1, "x"));
        }

        let packages = buffer.push(&combined).unwrap();

        let methods: Vec<_> = packages.iter().map(method_of).collect();
        assert_eq!(methods, vec!["first", "second", "third"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_package_bytes("m", 42, "test");

        let packages = buffer.push(&bytes[..5]).unwrap();
        assert!(packages.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPrefix");

        let packages = buffer.push(&bytes[5..]).unwrap();
        assert_eq!(packages.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_package_bytes("m", 42, "this is a longer body that will be fragmented");

        let partial_len = PREFIX_SIZE + 10;
        let packages = buffer.push(&bytes[..partial_len]).unwrap();
        assert!(packages.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForRest");

        let packages = buffer.push(&bytes[partial_len..]).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0], bytes);
    }

    #[test]
    fn test_max_package_validation() {
        let mut buffer = FrameBuffer::with_max_package(100);
        let prefix = Prefix::new(0, 10, 1000).encode();

        let result = buffer.push(&prefix);

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_bad_start_marker_is_an_error() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(b"GET / HTTP/1.1\r\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_package_bytes("m", 42, "test");

        buffer.push(&bytes[..PREFIX_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForRest");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForPrefix");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let first = make_package_bytes("first", 1, "a");
        let second = make_package_bytes("second", 2, "b");

        let mut data = first.to_vec();
        data.extend_from_slice(&second[..5]);

        let packages = buffer.push(&data).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(method_of(&packages[0]), "first");

        let packages = buffer.push(&second[5..]).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(method_of(&packages[0]), "second");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = make_package_bytes("m", 42, "hi");

        let mut all = Vec::new();
        for byte in bytes.iter() {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(all[0], bytes);
    }
}
