//! Calling side: pending calls, response routing and the service client.
//!
//! Each call gets a sequence number that travels in the package head. The
//! read loop of a client connection hands every inbound package to a
//! [`ResponseRouter`], which decodes it on a bounded [`TaskPool`] and
//! completes the pending call with the matching sequence number.
//!
//! A saturated pool drops the response; the caller sees the loss as a
//! timeout.
//!
//! # Example
//!
//! ```ignore
//! use easycall::client::{ClientConfig, ServiceClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ServiceClient::connect("127.0.0.1:10028", "echo", ClientConfig::default()).await?;
//!     let reply: String = client.call("echo", &"hello").await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::BodyFormat;
use crate::connection::Connection;
use crate::error::{EasycallError, Result};
use crate::pool::TaskPool;
use crate::protocol::{Package, PackageHead, DEFAULT_MAX_PACKAGE_SIZE};
use crate::transport::read_loop;
use crate::writer::{spawn_writer_task, WriterConfig};

/// Default response router pool capacity.
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

/// Default time a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time allowed to establish the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls waiting for a response, keyed by sequence number.
pub struct PendingCalls {
    next_seq: AtomicU64,
    calls: Mutex<HashMap<u64, oneshot::Sender<Package>>>,
    closed: AtomicBool,
}

impl PendingCalls {
    /// Create an empty table. Sequence numbers start at 1.
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate a sequence number and the receiver its response arrives on.
    ///
    /// Once [`fail_all`](Self::fail_all) has run, the receiver resolves to an
    /// error straight away.
    pub fn register(&self) -> (u64, oneshot::Receiver<Package>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut calls = self.calls.lock();
        if !self.closed.load(Ordering::Acquire) {
            calls.insert(seq, tx);
        }
        (seq, rx)
    }

    /// Deliver a response to the call it answers.
    ///
    /// Returns false when no call is waiting on the package's sequence number.
    pub fn complete(&self, package: Package) -> bool {
        let tx = self.calls.lock().remove(&package.head.seq);
        match tx {
            Some(tx) => tx.send(package).is_ok(),
            None => false,
        }
    }

    /// Forget a call, e.g. after it timed out.
    pub fn cancel(&self, seq: u64) -> bool {
        self.calls.lock().remove(&seq).is_some()
    }

    /// Fail every waiting call and refuse new ones.
    pub fn fail_all(&self) {
        let mut calls = self.calls.lock();
        self.closed.store(true, Ordering::Release);
        calls.clear();
    }

    /// Number of calls waiting.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Check if no call is waiting.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Removes a call's pending entry unless the call completed.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    seq: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.cancel(self.seq);
        }
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes inbound response packages to their pending calls.
#[derive(Clone)]
pub struct ResponseRouter {
    pending: Arc<PendingCalls>,
    pool: TaskPool,
}

impl ResponseRouter {
    /// Create a router completing calls in `pending`, decoding on a pool of
    /// `capacity` tasks.
    pub fn new(pending: Arc<PendingCalls>, capacity: usize) -> Self {
        Self {
            pending,
            pool: TaskPool::new("response-router", capacity),
        }
    }

    /// Submit one raw package without waiting.
    ///
    /// When the pool is saturated the package is dropped, logged, and
    /// `Err(PoolSaturated)` is returned.
    pub fn dispatch(&self, data: Bytes) -> Result<JoinHandle<Result<()>>> {
        let pending = self.pending.clone();

        self.pool
            .try_submit(async move {
                let package = Package::decode(data)?;
                let seq = package.head.seq;
                if !pending.complete(package) {
                    tracing::warn!(seq, "Response for unknown call dropped");
                }
                Ok(())
            })
            .map_err(|e| {
                tracing::warn!("Dropping response: {}", e);
                e
            })
    }

    /// The pool responses are decoded on.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }
}

/// Configuration for a [`ServiceClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Response router pool capacity.
    pub pool_capacity: usize,
    /// Time a call waits for its response.
    pub call_timeout: Duration,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Body format for requests.
    pub format: BodyFormat,
    /// Largest package accepted from the server.
    pub max_package_size: u32,
    /// Writer task configuration.
    pub writer: WriterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            format: BodyFormat::default(),
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Set the response router pool capacity.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set the per-call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request body format.
    pub fn format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }
}

/// Client for one remote service over one connection.
pub struct ServiceClient {
    service: String,
    conn: Connection,
    pending: Arc<PendingCalls>,
    format: BodyFormat,
    call_timeout: Duration,
    read_task: JoinHandle<()>,
}

impl ServiceClient {
    /// Connect to `addr` and call `service` on it.
    pub async fn connect<A: ToSocketAddrs>(addr: A, service: &str, config: ClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| EasycallError::Timeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;

        let remote = stream.peer_addr()?.to_string();
        let (reader, writer) = stream.into_split();
        Ok(Self::from_io(reader, writer, remote, service, config))
    }

    /// Build a client over an already established stream.
    pub fn from_io<R, W>(reader: R, writer: W, remote: String, service: &str, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, _writer_task) = spawn_writer_task(writer, config.writer.clone());
        let conn = Connection::new(remote, writer);
        let pending = Arc::new(PendingCalls::new());
        let router = ResponseRouter::new(pending.clone(), config.pool_capacity);

        let loop_pending = pending.clone();
        let max_package_size = config.max_package_size;
        let read_task = tokio::spawn(async move {
            let result = read_loop(reader, max_package_size, |data| {
                // Saturation is logged by the router
                let _ = router.dispatch(data);
            })
            .await;
            if let Err(e) = result {
                tracing::error!("Client read loop error: {}", e);
            }
            loop_pending.fail_all();
        });

        Self {
            service: service.to_string(),
            conn,
            pending,
            format: config.format,
            call_timeout: config.call_timeout,
            read_task,
        }
    }

    /// Call `method` and decode its response body.
    ///
    /// A non-zero return code surfaces as [`EasycallError::Status`]. A missing
    /// response surfaces as [`EasycallError::Timeout`].
    pub async fn call<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let package = self.call_package(method, req).await?;
        if !package.head.is_ok() {
            return Err(EasycallError::status(package.head.ret, package.head.msg));
        }
        package.body_as()
    }

    /// Call `method` and return the raw response package, whatever its
    /// return code.
    pub async fn call_package<Req>(&self, method: &str, req: &Req) -> Result<Package>
    where
        Req: Serialize + ?Sized,
    {
        let (seq, rx) = self.pending.register();
        // Dropping this future at any await leaves no entry behind
        let mut guard = PendingGuard {
            pending: &self.pending,
            seq,
            armed: true,
        };

        let head = PackageHead::request(&self.service, method, seq);
        let package = Package::with_body(self.format, head, req)?;
        self.conn.send_package(&package).await?;

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(package)) => {
                guard.disarm();
                Ok(package)
            }
            Ok(Err(_)) => Err(EasycallError::ConnectionClosed),
            Err(_) => {
                tracing::debug!(service = %self.service, method, seq, "Call timed out");
                Err(EasycallError::Timeout(self.call_timeout))
            }
        }
    }

    /// Target service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Peer address.
    pub fn remote_addr(&self) -> &str {
        self.conn.remote_addr()
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Check if the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.read_task.is_finished() || self.conn.is_closed()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("conn", &self.conn)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use crate::protocol::{ret, FrameBuffer};

    fn response(seq: u64, ret_code: i32, body: &str) -> Package {
        let mut head = PackageHead::request("echo", "echo", seq);
        head.set_ret(ret_code);
        if ret_code != ret::OK {
            head.set_msg("failed");
        }
        Package::with_body(BodyFormat::MsgPack, head, body).unwrap()
    }

    /// Answers every request on `io` with `ret_code` and the request body.
    async fn fake_server(mut io: DuplexStream, ret_code: i32) {
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match io.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for blob in frames.push(&buf[..n]).unwrap() {
                let req = Package::decode(blob).unwrap();
                let text: String = req.body_as().unwrap();
                let resp = response(req.head.seq, ret_code, &text);
                io.write_all(&resp.encode().unwrap()).await.unwrap();
            }
        }
    }

    fn client(io: DuplexStream, config: ClientConfig) -> ServiceClient {
        let (reader, writer) = tokio::io::split(io);
        ServiceClient::from_io(reader, writer, "test".to_string(), "echo", config)
    }

    #[test]
    fn test_pending_calls_lifecycle() {
        let pending = PendingCalls::new();
        let (s1, mut rx1) = pending.register();
        let (s2, _rx2) = pending.register();
        assert_eq!((s1, s2), (1, 2));
        assert_eq!(pending.len(), 2);

        assert!(pending.complete(response(s1, ret::OK, "a")));
        assert_eq!(rx1.try_recv().unwrap().head.seq, 1);
        assert!(!pending.complete(response(s1, ret::OK, "again")));

        assert!(pending.cancel(s2));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fail_all_refuses_new_calls() {
        let pending = PendingCalls::new();
        let (_, mut waiting) = pending.register();
        pending.fail_all();

        assert!(waiting.try_recv().is_err());
        let (_, mut late) = pending.register();
        assert!(matches!(
            late.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_router_completes_by_seq() {
        let pending = Arc::new(PendingCalls::new());
        let router = ResponseRouter::new(pending.clone(), 4);
        let (_s1, rx1) = pending.register();
        let (s2, rx2) = pending.register();

        router
            .dispatch(response(s2, ret::OK, "second").encode().unwrap())
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let package = rx2.await.unwrap();
        assert_eq!(package.body_as::<String>().unwrap(), "second");
        assert_eq!(pending.len(), 1);
        drop(rx1);
    }

    #[tokio::test]
    async fn test_router_saturation_is_immediate() {
        let pending = Arc::new(PendingCalls::new());
        let router = ResponseRouter::new(pending, 1);

        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let _busy = router
            .pool()
            .try_submit(async move {
                let _ = hold_rx.await;
                Ok(())
            })
            .unwrap();

        let rejected = router.dispatch(response(1, ret::OK, "x").encode().unwrap());
        assert!(matches!(
            rejected,
            Err(EasycallError::PoolSaturated { capacity: 1 })
        ));
        drop(hold_tx);
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (ours, theirs) = duplex(64 * 1024);
        tokio::spawn(fake_server(theirs, ret::OK));
        let client = client(ours, ClientConfig::default());

        let reply: String = client.call("echo", "hello").await.unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_matched_by_seq() {
        let (ours, theirs) = duplex(64 * 1024);
        tokio::spawn(fake_server(theirs, ret::OK));
        let client = Arc::new(client(ours, ClientConfig::default()));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let text = format!("msg-{}", i);
                let reply: String = client.call("echo", &text).await.unwrap();
                assert_eq!(reply, text);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_error_code_surfaces_as_status() {
        let (ours, theirs) = duplex(64 * 1024);
        tokio::spawn(fake_server(theirs, ret::SERVICE_FAILURE));
        let client = client(ours, ClientConfig::default());

        let err = client.call::<_, String>("echo", "x").await.unwrap_err();
        assert!(matches!(
            err,
            EasycallError::Status { code, ref message } if code == ret::SERVICE_FAILURE && message == "failed"
        ));

        let package = client.call_package("echo", "x").await.unwrap();
        assert_eq!(package.head.ret, ret::SERVICE_FAILURE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_response_times_out() {
        let (ours, _theirs) = duplex(64 * 1024);
        let config = ClientConfig::default().call_timeout(Duration::from_millis(200));
        let client = client(ours, config);

        let err = client.call::<_, String>("echo", "x").await.unwrap_err();
        assert!(matches!(err, EasycallError::Timeout(_)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_calls_leave_no_pending_entry() {
        let (ours, _theirs) = duplex(64 * 1024);
        let client = client(ours, ClientConfig::default());

        for _ in 0..5 {
            let waited =
                tokio::time::timeout(Duration::from_millis(10), client.call::<_, String>("echo", "x")).await;
            assert!(waited.is_err());
        }
        assert_eq!(client.pending_calls(), 0);

        let mut call = Box::pin(client.call::<_, String>("echo", "x"));
        assert!(futures::poll!(call.as_mut()).is_pending());
        assert_eq!(client.pending_calls(), 1);
        drop(call);
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_fails_waiting_call() {
        let (ours, theirs) = duplex(64 * 1024);
        let client = client(ours, ClientConfig::default());

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(theirs);
        });

        let err = client.call::<_, String>("echo", "x").await.unwrap_err();
        assert!(matches!(err, EasycallError::ConnectionClosed));
        closer.await.unwrap();
    }
}
