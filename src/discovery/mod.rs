//! Service presence advertisement.
//!
//! A [`Discovery`] backend hands out [`Registrar`] handles; a registrar
//! creates and removes leased presence records of the form
//! `(name, port, weight)`. Records disappear on their own when their lease
//! is not kept alive.
//!
//! [`MemoryDiscovery`] is an in-process backend with TTL leases.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::service::BoxFuture;

pub use memory::{MemoryDiscovery, DEFAULT_LEASE_TTL};

/// Default time allowed to reach the discovery backend.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One advertised service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceRecord {
    /// Service name.
    pub name: String,
    /// Listening port.
    pub port: u16,
    /// Relative share of traffic.
    pub weight: u32,
}

/// Registers and removes presence records.
pub trait Registrar: Send + Sync {
    /// Create (or refresh) a leased record for `name` on `port`.
    fn register<'a>(&'a self, name: &'a str, port: u16, weight: u32) -> BoxFuture<'a, Result<()>>;

    /// Remove the record for `name` on `port`.
    fn unregister<'a>(&'a self, name: &'a str, port: u16) -> BoxFuture<'a, Result<()>>;
}

/// A discovery backend.
pub trait Discovery: Send + Sync {
    /// Connect to the backend at `endpoints`, giving up after `timeout`.
    fn connect<'a>(
        &'a self,
        endpoints: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Arc<dyn Registrar>>>;
}
