//! In-process discovery backend with TTL leases.
//!
//! Every registered record carries a lease that expires after the TTL. A
//! keep-alive task refreshes the lease at a third of the TTL until the record
//! is unregistered or the backend is dropped. Expired records are invisible to
//! [`MemoryDiscovery::lookup`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Discovery, PresenceRecord, Registrar};
use crate::error::{EasycallError, Result};
use crate::service::BoxFuture;

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);

type Key = (String, u16);

struct Lease {
    record: PresenceRecord,
    expires_at: Instant,
    keeper: Option<JoinHandle<()>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
    }
}

struct Inner {
    ttl: Duration,
    leases: Mutex<HashMap<Key, Lease>>,
}

/// In-memory discovery store.
///
/// Cheap to clone; clones share records.
#[derive(Clone)]
pub struct MemoryDiscovery {
    inner: Arc<Inner>,
}

impl Default for MemoryDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TTL)
    }
}

impl MemoryDiscovery {
    /// Create a store whose leases last `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                leases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Lease time-to-live.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Create a leased record and start keeping it alive.
    pub fn register(&self, name: &str, port: u16, weight: u32) -> Result<()> {
        if name.is_empty() {
            return Err(EasycallError::Discovery("empty service name".to_string()));
        }

        let key = (name.to_string(), port);
        let keeper = tokio::spawn(keep_alive_loop(Arc::downgrade(&self.inner), key.clone()));
        let lease = Lease {
            record: PresenceRecord {
                name: name.to_string(),
                port,
                weight,
            },
            expires_at: Instant::now() + self.inner.ttl,
            keeper: Some(keeper),
        };

        // Replacing an existing lease aborts its keeper on drop
        self.inner.leases.lock().insert(key, lease);
        tracing::debug!(name, port, weight, "Presence record registered");
        Ok(())
    }

    /// Remove a record.
    ///
    /// Fails if no live record exists for `name` on `port`.
    pub fn unregister(&self, name: &str, port: u16) -> Result<()> {
        let removed = self.inner.leases.lock().remove(&(name.to_string(), port));
        match removed {
            Some(lease) if lease.expires_at > Instant::now() => {
                tracing::debug!(name, port, "Presence record removed");
                Ok(())
            }
            _ => Err(EasycallError::Discovery(format!(
                "no presence record for {}:{}",
                name, port
            ))),
        }
    }

    /// Extend the lease of a live record by one TTL.
    pub fn keep_alive(&self, name: &str, port: u16) -> Result<()> {
        let now = Instant::now();
        let mut leases = self.inner.leases.lock();
        match leases.get_mut(&(name.to_string(), port)) {
            Some(lease) if lease.expires_at > now => {
                lease.expires_at = now + self.inner.ttl;
                Ok(())
            }
            _ => Err(EasycallError::Discovery(format!(
                "lease for {}:{} expired",
                name, port
            ))),
        }
    }

    /// Live records for `name`, ordered by port.
    pub fn lookup(&self, name: &str) -> Vec<PresenceRecord> {
        let now = Instant::now();
        let mut records: Vec<PresenceRecord> = self
            .inner
            .leases
            .lock()
            .values()
            .filter(|lease| lease.record.name == name && lease.expires_at > now)
            .map(|lease| lease.record.clone())
            .collect();
        records.sort_by_key(|record| record.port);
        records
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .leases
            .lock()
            .values()
            .filter(|lease| lease.expires_at > now)
            .count()
    }

    /// Check if no live record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop refreshing a record's lease, leaving it to expire.
    pub fn revoke_keep_alive(&self, name: &str, port: u16) {
        if let Some(lease) = self.inner.leases.lock().get_mut(&(name.to_string(), port)) {
            if let Some(keeper) = lease.keeper.take() {
                keeper.abort();
            }
        }
    }
}

async fn keep_alive_loop(inner: Weak<Inner>, key: Key) {
    let period = match inner.upgrade() {
        Some(inner) => (inner.ttl / 3).max(Duration::from_millis(1)),
        None => return,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut leases = inner.leases.lock();
        match leases.get_mut(&key) {
            Some(lease) => lease.expires_at = Instant::now() + inner.ttl,
            None => return,
        }
    }
}

impl fmt::Debug for MemoryDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDiscovery")
            .field("ttl", &self.inner.ttl)
            .field("records", &self.inner.leases.lock().len())
            .finish()
    }
}

impl Registrar for MemoryDiscovery {
    fn register<'a>(&'a self, name: &'a str, port: u16, weight: u32) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { MemoryDiscovery::register(self, name, port, weight) })
    }

    fn unregister<'a>(&'a self, name: &'a str, port: u16) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { MemoryDiscovery::unregister(self, name, port) })
    }
}

impl Discovery for MemoryDiscovery {
    fn connect<'a>(
        &'a self,
        endpoints: &'a [String],
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Arc<dyn Registrar>>> {
        Box::pin(async move {
            if endpoints.is_empty() {
                return Err(EasycallError::Discovery(
                    "no discovery endpoints configured".to_string(),
                ));
            }
            Ok(Arc::new(self.clone()) as Arc<dyn Registrar>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DEFAULT_CONNECT_TIMEOUT;

    fn endpoints() -> Vec<String> {
        vec!["memory://local".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_lookup_unregister() {
        let discovery = MemoryDiscovery::default();
        discovery.register("profile", 10028, 100).unwrap();
        discovery.register("profile", 10029, 50).unwrap();
        discovery.register("order", 10030, 100).unwrap();

        let records = discovery.lookup("profile");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].port, 10028);
        assert_eq!(records[1].weight, 50);

        discovery.unregister("profile", 10028).unwrap();
        assert_eq!(discovery.lookup("profile").len(), 1);
        assert_eq!(discovery.len(), 2);

        assert!(discovery.unregister("profile", 10028).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_holds_lease() {
        let discovery = MemoryDiscovery::new(Duration::from_secs(3));
        discovery.register("profile", 1, 1).unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(discovery.lookup("profile").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_without_keep_alive() {
        let discovery = MemoryDiscovery::new(Duration::from_secs(3));
        discovery.register("profile", 1, 1).unwrap();
        discovery.revoke_keep_alive("profile", 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        discovery.keep_alive("profile", 1).unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(discovery.lookup("profile").is_empty());
        assert!(discovery.keep_alive("profile", 1).is_err());
        assert!(discovery.unregister("profile", 1).is_err());
        assert!(discovery.is_empty());
    }

    #[tokio::test]
    async fn test_connect_needs_endpoints() {
        let discovery = MemoryDiscovery::default();

        let err = Discovery::connect(&discovery, &[], DEFAULT_CONNECT_TIMEOUT).await;
        assert!(matches!(err, Err(EasycallError::Discovery(_))));

        let endpoints = endpoints();
        let registrar = Discovery::connect(&discovery, &endpoints, DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap();
        registrar.register("profile", 7, 1).await.unwrap();
        assert_eq!(discovery.lookup("profile").len(), 1);
        registrar.unregister("profile", 7).await.unwrap();
        assert!(discovery.lookup("profile").is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let discovery = MemoryDiscovery::default();
        assert!(discovery.register("", 1, 1).is_err());
    }
}
