//! TCP listener, accept loop and per-connection read loop.
//!
//! # Example
//!
//! ```ignore
//! use easycall::transport::{bind, serve, ServerConfig};
//!
//! let listener = bind("0.0.0.0", 10028).await?;
//! serve(listener, dispatcher, ServerConfig::default()).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tracing::Instrument;

use crate::connection::Connection;
use crate::dispatch::ServiceDispatcher;
use crate::error::Result;
use crate::protocol::{FrameBuffer, DEFAULT_MAX_PACKAGE_SIZE};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Default maximum concurrent calls per service.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Read buffer size for one connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Configuration for serving one service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum calls running at once for the service.
    pub max_concurrent_handlers: usize,
    /// Largest package accepted on a connection.
    pub max_package_size: u32,
    /// Writer task configuration for each connection.
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

/// Bind a TCP listener on `host:port`. Port 0 picks a free port.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

/// Accept connections forever, serving each on its own task.
///
/// Accept errors are logged and do not stop the loop.
pub async fn serve(listener: TcpListener, dispatcher: Arc<ServiceDispatcher>, config: ServerConfig) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(service = dispatcher.service(), "Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let remote = addr.to_string();
        let span = tracing::debug_span!("connection", service = dispatcher.service(), remote = %remote);
        let (reader, writer) = stream.into_split();
        let dispatcher = dispatcher.clone();
        let config = config.clone();

        tokio::spawn(
            async move {
                tracing::debug!("Connection accepted");
                match serve_connection(reader, writer, remote, dispatcher, &config).await {
                    Ok(()) => tracing::debug!("Connection closed"),
                    Err(e) => tracing::warn!("Connection closed with error: {}", e),
                }
            }
            .instrument(span),
        );
    }
}

/// Serve one established connection until the peer closes it.
///
/// Packages are handed to the dispatcher in the order they arrive.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    remote: String,
    dispatcher: Arc<ServiceDispatcher>,
    config: &ServerConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer, _writer_task) = spawn_writer_task(writer, config.writer.clone());
    let conn = Connection::new(remote, writer);

    read_loop(reader, config.max_package_size, |data| {
        // Saturation is logged by the dispatcher
        let _ = dispatcher.dispatch(data, &conn);
    })
    .await
}

/// Read packages off `reader` and pass each complete one to `on_package`.
///
/// Returns `Ok(())` when the peer closes the stream, and an error on I/O
/// failure or unrecoverable framing.
pub async fn read_loop<R, F>(mut reader: R, max_package_size: u32, mut on_package: F) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Bytes),
{
    let mut frame_buffer = FrameBuffer::with_max_package(max_package_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for package in frame_buffer.push(&buf[..n])? {
            on_package(package);
        }
    }
}
