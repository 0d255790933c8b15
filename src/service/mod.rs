//! Service module - the contract a service implementation satisfies.
//!
//! Provides:
//! - [`Request`] / [`Response`] - one call's input and in-place output
//! - [`Handler`] - a single method implementation
//! - [`MethodTable`] - method name to handler, built once per service
//! - [`Service`] - types that describe themselves as a [`MethodTable`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use easycall::service::{MethodTable, Service};
//!
//! struct Profiles;
//!
//! impl Service for Profiles {
//!     fn methods(self: Arc<Self>) -> MethodTable {
//!         MethodTable::new().method("count", move |_: (), _info| {
//!             let this = self.clone();
//!             async move { Ok(this.count()) }
//!         })
//!     }
//! }
//! ```

mod context;
mod registry;

pub use context::{Request, RequestInfo, Response};
pub use registry::{BoxFuture, Handler, MethodTable, Service, TypedHandler};
