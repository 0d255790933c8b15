//! Server-side inbound dispatch.
//!
//! One [`ServiceDispatcher`] exists per hosted service and is shared by every
//! connection accepted for it. Each received package becomes one task on the
//! service's [`TaskPool`]: decode, run the middleware chain, write the
//! response if one was produced.
//!
//! Failures never escape the task. A package that cannot be decoded has no
//! head to address a reply to, so nothing is written; a panic in an
//! interceptor or method is caught and nothing is written either. Both are
//! logged once by the pool.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::error::Result;
use crate::middleware::MiddlewareChain;
use crate::pool::{isolate, TaskPool};
use crate::protocol::Package;
use crate::service::{Request, Response};

/// Dispatches inbound packages for one service.
pub struct ServiceDispatcher {
    service: Arc<str>,
    chain: MiddlewareChain,
    pool: TaskPool,
}

impl ServiceDispatcher {
    /// Create a dispatcher running at most `capacity` calls at once.
    pub fn new(service: &str, chain: MiddlewareChain, capacity: usize) -> Self {
        let service: Arc<str> = Arc::from(service);
        Self {
            pool: TaskPool::new(service.clone(), capacity),
            service,
            chain,
        }
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The chain every call runs through.
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// The pool calls run on.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Submit one raw package received on `conn` without waiting.
    ///
    /// When the pool is saturated the package is dropped, logged, and
    /// `Err(PoolSaturated)` is returned.
    pub fn dispatch(self: &Arc<Self>, data: Bytes, conn: &Connection) -> Result<JoinHandle<Result<()>>> {
        let this = self.clone();
        let task_conn = conn.clone();

        self.pool
            .try_submit(async move { this.process(data, &task_conn).await })
            .map_err(|e| {
                tracing::warn!(
                    service = %self.service,
                    remote = conn.remote_addr(),
                    "Dropping package: {}",
                    e
                );
                e
            })
    }

    /// Process one raw package to completion.
    ///
    /// Returns an error when the package cannot be decoded, when the chain
    /// panics, or when the response cannot be written. No response is written
    /// in the first two cases.
    pub async fn process(&self, data: Bytes, conn: &Connection) -> Result<()> {
        let package = Package::decode(data)?;

        let mut req = Request::from_package(package, conn.remote_addr());
        let mut resp = Response::for_request(&req);

        tracing::trace!(
            service = %self.service,
            method = req.method(),
            seq = req.seq(),
            "Dispatching call"
        );

        isolate(self.chain.handle(&mut req, &mut resp, conn)).await?;

        if !resp.is_produced() {
            tracing::debug!(
                service = %self.service,
                method = req.method(),
                seq = req.seq(),
                "Chain finished without a response"
            );
            return Ok(());
        }

        conn.send_package(&resp.into_package()).await
    }
}

impl fmt::Debug for ServiceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDispatcher")
            .field("service", &self.service)
            .field("chain", &self.chain)
            .field("pool", &self.pool)
            .finish()
    }
}
