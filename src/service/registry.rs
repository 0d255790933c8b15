//! Method capability table.
//!
//! A [`MethodTable`] maps method names to handlers and is built once per
//! service implementation, before any traffic arrives. Dispatch is a plain
//! map lookup on the method name carried in the package head.
//!
//! # Example
//!
//! ```ignore
//! use easycall::service::MethodTable;
//!
//! let table = MethodTable::new()
//!     .method("echo", |text: String, _info| async move { Ok(text) })
//!     .method("add", |(a, b): (i64, i64), _info| async move { Ok(a + b) });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Request, RequestInfo, Response};
use crate::error::{EasycallError, Result};
use crate::protocol::ret;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A method implementation: reads the request and mutates the response in
/// place.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call.
    fn call<'a>(&'a self, req: &'a Request, resp: &'a mut Response) -> BoxFuture<'a, ()>;
}

/// Wrapper that decodes the body before calling the handler and encodes its
/// output as the response body.
///
/// An undecodable body is answered with [`ret::BAD_REQUEST`]. A
/// [`EasycallError::Status`] returned by the handler picks the return code;
/// any other error is answered with [`ret::SERVICE_FAILURE`].
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestInfo) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestInfo) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestInfo) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call<'a>(&'a self, req: &'a Request, resp: &'a mut Response) -> BoxFuture<'a, ()> {
        let input: T = match req.body_as() {
            Ok(v) => v,
            Err(e) => {
                resp.set_error(ret::BAD_REQUEST, e.to_string());
                return Box::pin(async {});
            }
        };

        let fut = (self.handler)(input, req.info());
        Box::pin(async move {
            match fut.await {
                Ok(output) => {
                    if let Err(e) = resp.set_body(&output) {
                        resp.set_error(ret::SERVICE_FAILURE, e.to_string());
                    }
                }
                Err(EasycallError::Status { code, message }) => resp.set_error(code, message),
                Err(e) => resp.set_error(ret::SERVICE_FAILURE, e.to_string()),
            }
        })
    }
}

/// Adapter for closures that work on the request and response directly.
struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: &'a Request, resp: &'a mut Response) -> BoxFuture<'a, ()> {
        (self.0)(req, resp)
    }
}

/// Capability table: method name to handler.
///
/// Cheap to clone; handlers are shared.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl MethodTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed method.
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn method<F, T, R, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(T, RequestInfo) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.handler(name, TypedHandler::new(handler))
    }

    /// Register a method that mutates the response in place.
    pub fn raw<F>(self, name: &str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.handler(name, FnHandler(handler))
    }

    /// Register any [`Handler`] implementation.
    pub fn handler(mut self, name: &str, handler: impl Handler) -> Self {
        self.methods.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Check if a method is exposed.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Get the handler for a method.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.methods.get(name)
    }

    /// Exposed method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of exposed methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no method is exposed.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Dispatch one call by method name.
    ///
    /// An unknown method is answered with [`ret::METHOD_NOT_FOUND`] and no
    /// handler runs. Otherwise the handler runs and the response is marked
    /// produced, even if the handler set nothing.
    pub async fn invoke(&self, req: &Request, resp: &mut Response) {
        match self.methods.get(req.method()) {
            Some(handler) => {
                handler.call(req, resp).await;
                resp.mark_produced();
            }
            None => {
                let err = EasycallError::MethodNotFound(req.method().to_string());
                resp.set_error(ret::METHOD_NOT_FOUND, err.to_string());
            }
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

/// A service implementation that can describe its methods.
pub trait Service: Send + Sync + 'static {
    /// Build the capability table for this implementation.
    fn methods(self: Arc<Self>) -> MethodTable;
}

impl Service for MethodTable {
    fn methods(self: Arc<Self>) -> MethodTable {
        Arc::try_unwrap(self).unwrap_or_else(|shared| (*shared).clone())
    }
}
