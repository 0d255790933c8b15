//! Error types for easycall.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all easycall operations.
#[derive(Debug, Error)]
pub enum EasycallError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (bad framing, unknown format tag, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No handler is exposed under the requested method name.
    #[error("method {0} not found")]
    MethodNotFound(String),

    /// The task pool had no free slot for a submission.
    #[error("Task pool saturated (capacity {capacity})")]
    PoolSaturated { capacity: usize },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// An operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Discovery backend failure (connect, register, unregister).
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A non-zero return code: returned by a handler to pick the code sent to
    /// the caller, and seen by a caller when the remote side answers with one.
    #[error("status {code}: {message}")]
    Status { code: i32, message: String },

    /// A handler, interceptor or task terminated abnormally.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Invalid configuration or builder usage.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EasycallError {
    /// Build a [`EasycallError::Status`] error.
    pub fn status(code: i32, message: impl Into<String>) -> Self {
        EasycallError::Status {
            code,
            message: message.into(),
        }
    }
}

/// Result type alias using EasycallError.
pub type Result<T> = std::result::Result<T, EasycallError>;
