//! Connection handle shared by every task answering on one socket.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::Package;
use crate::writer::WriterHandle;

/// Handle to an established connection.
///
/// Clones share the same writer task, so concurrent `send` calls are
/// serialized and whole packages never interleave on the wire.
#[derive(Clone)]
pub struct Connection {
    remote_addr: Arc<str>,
    writer: WriterHandle,
}

impl Connection {
    /// Wrap a writer handle for the peer at `remote_addr`.
    pub fn new(remote_addr: impl Into<Arc<str>>, writer: WriterHandle) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            writer,
        }
    }

    /// Peer address as a string.
    #[inline]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Send already-encoded bytes.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.writer.send(data).await
    }

    /// Encode and send a package.
    pub async fn send_package(&self, package: &Package) -> Result<()> {
        self.writer.send(package.encode()?).await
    }

    /// Check if the underlying writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("pending", &self.writer.pending_count())
            .finish()
    }
}
