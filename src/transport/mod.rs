//! Transport module - TCP socket handling.
//!
//! Provides:
//! - [`bind`] / [`serve`] - listener and accept loop for one service
//! - [`serve_connection`] - drive one established stream
//! - [`read_loop`] - split a byte stream into packages

mod tcp;

pub use tcp::{
    bind, read_loop, serve, serve_connection, ServerConfig, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
