//! Interceptor chains wrapping every inbound call.
//!
//! Interceptors are added per service name in registration order. Building a
//! chain freezes that order into a slice and appends the service's
//! [`MethodTable`] as the terminal link. Each interceptor receives a [`Next`]
//! holding the not-yet-executed remainder of the chain and decides whether to
//! continue by calling [`Next::run`]; returning without doing so
//! short-circuits everything after it, including the method itself.
//!
//! # Example
//!
//! ```ignore
//! use easycall::middleware::{from_fn, MiddlewareRegistry};
//!
//! let mut registry = MiddlewareRegistry::new();
//! registry.add("profile", from_fn(|req, resp, conn, next| Box::pin(async move {
//!     if req.head().service != "profile" {
//!         resp.set_error(403, "forbidden");
//!         return;
//!     }
//!     next.run(req, resp, conn).await;
//! })))?;
//!
//! let chain = registry.build("profile", table);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{EasycallError, Result};
use crate::service::{BoxFuture, MethodTable, Request, Response};

/// One interceptor.
pub trait Middleware: Send + Sync + 'static {
    /// Process a call. Call `next.run(..)` to continue down the chain.
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
        conn: &'a Connection,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()>;
}

/// Interceptor backed by a closure. Built with [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, &'a Connection, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
        conn: &'a Connection,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()> {
        (self.0)(req, resp, conn, next)
    }
}

/// Wrap a closure as a [`Middleware`].
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, &'a Connection, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    FromFn(f)
}

/// The unexecuted remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    links: &'a [Arc<dyn Middleware>],
    terminal: &'a MethodTable,
}

impl<'a> Next<'a> {
    /// Run the next interceptor, or the terminal method dispatch once every
    /// interceptor has run.
    pub fn run<'b>(
        self,
        req: &'b mut Request,
        resp: &'b mut Response,
        conn: &'b Connection,
    ) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        match self.links.split_first() {
            Some((link, rest)) => {
                let next = Next {
                    links: rest,
                    terminal: self.terminal,
                };
                link.handle(req, resp, conn, next)
            }
            None => Box::pin(self.terminal.invoke(req, resp)),
        }
    }

    /// Number of interceptors still to run before the terminal link.
    pub fn remaining(&self) -> usize {
        self.links.len()
    }
}

/// An immutable chain of interceptors ending in method dispatch.
#[derive(Clone)]
pub struct MiddlewareChain {
    links: Arc<[Arc<dyn Middleware>]>,
    terminal: Arc<MethodTable>,
}

impl MiddlewareChain {
    /// Build a chain from interceptors in execution order.
    pub fn new(links: Vec<Arc<dyn Middleware>>, terminal: MethodTable) -> Self {
        Self {
            links: links.into(),
            terminal: Arc::new(terminal),
        }
    }

    /// Run one call through the whole chain.
    pub async fn handle(&self, req: &mut Request, resp: &mut Response, conn: &Connection) {
        let next = Next {
            links: &self.links,
            terminal: &self.terminal,
        };
        next.run(req, resp, conn).await
    }

    /// Number of links, counting the terminal one.
    pub fn len(&self) -> usize {
        self.links.len() + 1
    }

    /// Always false: a chain holds at least its terminal link.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The terminal method table.
    pub fn methods(&self) -> &MethodTable {
        &self.terminal
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("interceptors", &self.links.len())
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// Per-service interceptor lists, collected before startup.
#[derive(Default)]
pub struct MiddlewareRegistry {
    pending: HashMap<String, Vec<Arc<dyn Middleware>>>,
    built: HashSet<String>,
}

impl MiddlewareRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the named chain.
    ///
    /// Fails once the chain for `name` has been built.
    pub fn add(&mut self, name: &str, middleware: impl Middleware) -> Result<()> {
        self.add_shared(name, Arc::new(middleware))
    }

    /// Append an already shared interceptor to the named chain.
    pub fn add_shared(&mut self, name: &str, middleware: Arc<dyn Middleware>) -> Result<()> {
        if self.built.contains(name) {
            return Err(EasycallError::Config(format!(
                "middleware chain for {} is already built",
                name
            )));
        }
        self.pending
            .entry(name.to_string())
            .or_default()
            .push(middleware);
        Ok(())
    }

    /// Number of interceptors waiting for the named chain.
    pub fn count(&self, name: &str) -> usize {
        self.pending.get(name).map_or(0, Vec::len)
    }

    /// Freeze the named chain with `terminal` appended.
    ///
    /// Later `add` calls for `name` fail.
    pub fn build(&mut self, name: &str, terminal: MethodTable) -> MiddlewareChain {
        let links = self.pending.remove(name).unwrap_or_default();
        self.built.insert(name.to_string());
        MiddlewareChain::new(links, terminal)
    }
}
