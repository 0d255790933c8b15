//! Protocol module - wire format, framing, and package types.
//!
//! This module implements the length-delimited package protocol:
//! - 10-byte prefix encoding/decoding plus one trailer byte
//! - [`Package`] / [`PackageHead`] encode and decode
//! - [`FrameBuffer`] for splitting a byte stream into whole packages

mod frame_buffer;
mod package;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use package::{Package, PackageHead};
pub use wire_format::{
    ret, Prefix, DEFAULT_MAX_PACKAGE_SIZE, ETX, PREFIX_SIZE, STX, TRAILER_SIZE,
};
