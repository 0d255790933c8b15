//! # easycall
//!
//! RPC serving and calling over a length-delimited binary protocol.
//!
//! Services advertise themselves through a discovery backend, accept calls
//! over TCP and run every inbound call through an ordered interceptor chain
//! before dispatching it by method name. Callers correlate responses by
//! sequence number and can guard dependencies with a circuit breaker.
//!
//! ## Architecture
//!
//! - **Server**: [`ServiceContext`] registers each service, binds its
//!   listener and feeds packages to a per-service [`ServiceDispatcher`]
//! - **Client**: [`ServiceClient`] sends calls and a [`ResponseRouter`]
//!   completes them as responses arrive
//! - **Resilience**: [`BreakerRegistry`] keeps one circuit per call-site name
//!
//! ## Example
//!
//! ```ignore
//! use easycall::{ContextConfig, MemoryDiscovery, MethodTable, ServiceContext};
//!
//! #[tokio::main]
//! async fn main() -> easycall::Result<()> {
//!     let mut ctx = ServiceContext::new(
//!         MemoryDiscovery::default(),
//!         ContextConfig::new(vec!["127.0.0.1:2379".to_string()]),
//!     );
//!
//!     let echo = MethodTable::new().method("echo", |s: String, _info| async move { Ok(s) });
//!     ctx.create_service("echo", 10028, echo, 100)?;
//!     ctx.add_middleware("echo", easycall::middleware::from_fn(|req, resp, conn, next| {
//!         Box::pin(async move {
//!             tracing::info!(method = req.method(), "call");
//!             next.run(req, resp, conn).await;
//!         })
//!     }))?;
//!
//!     ctx.start_and_wait().await?;
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod client;
pub mod codec;
pub mod connection;
pub mod context;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod protocol;
pub mod service;
pub mod signal;
pub mod transport;
pub mod writer;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitState};
pub use client::{ClientConfig, ResponseRouter, ServiceClient};
pub use codec::BodyFormat;
pub use connection::Connection;
pub use context::{ContextConfig, RunningContext, ServiceContext, ShutdownReport};
pub use discovery::{Discovery, MemoryDiscovery, Registrar};
pub use dispatch::ServiceDispatcher;
pub use error::{EasycallError, Result};
pub use middleware::{Middleware, MiddlewareChain, Next};
pub use protocol::{Package, PackageHead};
pub use service::{MethodTable, Request, Response, Service};
