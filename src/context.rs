//! Service lifecycle orchestration.
//!
//! A [`ServiceContext`] collects the services to host and their interceptors,
//! then starts every service concurrently:
//!
//! 1. connect to discovery (bounded by the discovery timeout)
//! 2. register the `(name, port, weight)` presence record
//! 3. bind the listener and serve connections through the service's chain
//!
//! A failure at any step abandons that one service; a bind failure also
//! removes the record registered in step 2. Sibling services are unaffected.
//!
//! Shutdown unregisters every record still registered, concurrently and
//! best-effort, then stops all listeners. In-flight calls are not drained.
//!
//! # Example
//!
//! ```ignore
//! use easycall::{ContextConfig, MemoryDiscovery, MethodTable, ServiceContext};
//!
//! #[tokio::main]
//! async fn main() -> easycall::Result<()> {
//!     let config = ContextConfig::new(vec!["127.0.0.1:2379".to_string()]);
//!     let mut ctx = ServiceContext::new(MemoryDiscovery::default(), config);
//!
//!     let echo = MethodTable::new().method("echo", |s: String, _info| async move { Ok(s) });
//!     ctx.create_service("echo", 10028, echo, 100)?;
//!
//!     let report = ctx.start_and_wait().await?;
//!     println!("unregistered {:?}", report.unregistered);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::breaker::BreakerRegistry;
use crate::discovery::{Discovery, Registrar, DEFAULT_CONNECT_TIMEOUT};
use crate::dispatch::ServiceDispatcher;
use crate::error::{EasycallError, Result};
use crate::middleware::{Middleware, MiddlewareRegistry};
use crate::service::{MethodTable, Service};
use crate::signal::TerminationListener;
use crate::transport::{self, ServerConfig};

/// Default time allowed for each unregister call during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Configuration for a [`ServiceContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Discovery backend endpoints.
    pub endpoints: Vec<String>,
    /// Time allowed for connect, register and unregister at startup.
    pub discovery_timeout: Duration,
    /// Time allowed for each unregister call during shutdown.
    pub shutdown_timeout: Duration,
    /// Host every listener binds on.
    pub host: String,
    /// Per-service server configuration.
    pub server: ServerConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            discovery_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            host: DEFAULT_HOST.to_string(),
            server: ServerConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Config with the given discovery endpoints and defaults elsewhere.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    /// Set the discovery timeout.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the per-record unregister timeout used at shutdown.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the bind host.
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the maximum calls running at once per service.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.server.max_concurrent_handlers = limit;
        self
    }

    /// Set the largest package accepted on a connection.
    pub fn max_package_size(mut self, size: u32) -> Self {
        self.server.max_package_size = size;
        self
    }
}

/// One hosted service.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Listening port (0 picks a free port).
    pub port: u16,
    /// Weight advertised to discovery.
    pub weight: u32,
    /// Capability table of the implementation.
    pub methods: MethodTable,
}

/// Collects services and interceptors, then starts them.
pub struct ServiceContext {
    config: ContextConfig,
    discovery: Arc<dyn Discovery>,
    services: Vec<ServiceInfo>,
    middlewares: MiddlewareRegistry,
    breakers: BreakerRegistry,
}

impl ServiceContext {
    /// Create a context registering services with `discovery`.
    pub fn new(discovery: impl Discovery + 'static, config: ContextConfig) -> Self {
        Self::with_discovery(Arc::new(discovery), config)
    }

    /// Create a context from a shared discovery backend.
    pub fn with_discovery(discovery: Arc<dyn Discovery>, config: ContextConfig) -> Self {
        Self {
            config,
            discovery,
            services: Vec::new(),
            middlewares: MiddlewareRegistry::new(),
            breakers: BreakerRegistry::default(),
        }
    }

    /// Add a service to host. Networking starts with [`start`](Self::start).
    pub fn create_service<S: Service>(&mut self, name: &str, port: u16, service: S, weight: u32) -> Result<()> {
        self.create_shared_service(name, port, Arc::new(service), weight)
    }

    /// Add a service whose implementation is already shared.
    pub fn create_shared_service<S: Service>(
        &mut self,
        name: &str,
        port: u16,
        service: Arc<S>,
        weight: u32,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(EasycallError::Config("service name must not be empty".to_string()));
        }
        if self.services.iter().any(|info| info.name == name) {
            return Err(EasycallError::Config(format!("service {} already created", name)));
        }

        self.services.push(ServiceInfo {
            name: name.to_string(),
            port,
            weight,
            methods: service.methods(),
        });
        Ok(())
    }

    /// Append an interceptor to a service's chain, in registration order.
    ///
    /// The service must already be created.
    pub fn add_middleware(&mut self, name: &str, middleware: impl Middleware) -> Result<()> {
        if !self.services.iter().any(|info| info.name == name) {
            return Err(EasycallError::Config(format!(
                "middleware added to unknown service {}",
                name
            )));
        }
        self.middlewares.add(name, middleware)
    }

    /// Services created so far.
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Breakers for call-sites of this process.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Context configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Start every service concurrently.
    ///
    /// Returns once each service is either listening or abandoned.
    pub async fn start(mut self) -> RunningContext {
        let shared = Arc::new(Shared::default());
        let config = Arc::new(self.config);
        let mut tasks = JoinSet::new();
        let mut ready = Vec::with_capacity(self.services.len());

        for info in self.services {
            let chain = self.middlewares.build(&info.name, info.methods.clone());
            let dispatcher = Arc::new(ServiceDispatcher::new(
                &info.name,
                chain,
                config.server.max_concurrent_handlers,
            ));

            let (ready_tx, ready_rx) = oneshot::channel();
            let span = tracing::info_span!("service", name = %info.name, port = info.port);
            tasks.spawn(
                run_service(
                    info,
                    dispatcher,
                    self.discovery.clone(),
                    config.clone(),
                    shared.clone(),
                    ready_tx,
                )
                .instrument(span),
            );
            ready.push(ready_rx);
        }

        // An abandoned service drops its sender
        for ready_rx in ready {
            let _ = ready_rx.await;
        }

        RunningContext {
            tasks,
            shared,
            shutdown_timeout: config.shutdown_timeout,
            breakers: self.breakers,
        }
    }

    /// Start every service, then wait for a termination signal or for every
    /// service to stop, and unregister.
    ///
    /// Returning from this is the request for process exit.
    pub async fn start_and_wait(self) -> Result<ShutdownReport> {
        let mut signals = TerminationListener::new()?;
        let running = self.start().await;
        Ok(running
            .wait(async move {
                signals.recv().await;
            })
            .await)
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

struct Registration {
    name: String,
    port: u16,
    registrar: Arc<dyn Registrar>,
}

#[derive(Default)]
struct Shared {
    registered: Mutex<Vec<Registration>>,
    local_addrs: Mutex<HashMap<String, SocketAddr>>,
}

impl Shared {
    fn remove_registration(&self, name: &str, port: u16) {
        self.registered
            .lock()
            .retain(|reg| !(reg.name == name && reg.port == port));
    }
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EasycallError::Timeout(limit))?
}

async fn run_service(
    info: ServiceInfo,
    dispatcher: Arc<ServiceDispatcher>,
    discovery: Arc<dyn Discovery>,
    config: Arc<ContextConfig>,
    shared: Arc<Shared>,
    ready: oneshot::Sender<()>,
) {
    let limit = config.discovery_timeout;

    let registrar = match bounded(limit, discovery.connect(&config.endpoints, limit)).await {
        Ok(registrar) => registrar,
        Err(e) => {
            tracing::error!(weight = info.weight, "Discovery connect failed: {}", e);
            return;
        }
    };

    if let Err(e) = bounded(limit, registrar.register(&info.name, info.port, info.weight)).await {
        tracing::error!(weight = info.weight, "Register failed: {}", e);
        return;
    }
    shared.registered.lock().push(Registration {
        name: info.name.clone(),
        port: info.port,
        registrar: registrar.clone(),
    });

    let listener = match transport::bind(&config.host, info.port).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Start service failed: {}", e);
            shared.remove_registration(&info.name, info.port);
            if let Err(e) = bounded(limit, registrar.unregister(&info.name, info.port)).await {
                tracing::error!("Unregister after failed start failed: {}", e);
            }
            return;
        }
    };

    match listener.local_addr() {
        Ok(addr) => {
            shared.local_addrs.lock().insert(info.name.clone(), addr);
            tracing::info!(%addr, "Service started");
        }
        Err(e) => tracing::warn!("Service started, local address unknown: {}", e),
    }
    let _ = ready.send(());

    transport::serve(listener, dispatcher, config.server.clone()).await;
}

/// Outcome of the shutdown unregister pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Services whose record was removed.
    pub unregistered: Vec<String>,
    /// Services whose unregister failed, with the error.
    pub failed: Vec<(String, String)>,
}

impl ShutdownReport {
    /// Number of unregister attempts made.
    pub fn attempts(&self) -> usize {
        self.unregistered.len() + self.failed.len()
    }
}

/// Services after [`ServiceContext::start`].
pub struct RunningContext {
    tasks: JoinSet<()>,
    shared: Arc<Shared>,
    shutdown_timeout: Duration,
    breakers: BreakerRegistry,
}

impl RunningContext {
    /// Address a service is listening on.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.shared.local_addrs.lock().get(name).copied()
    }

    /// Names of services with a live presence record, in registration order.
    pub fn registered(&self) -> Vec<String> {
        self.shared
            .registered
            .lock()
            .iter()
            .map(|reg| reg.name.clone())
            .collect()
    }

    /// Breakers for call-sites of this process.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Wait until `shutdown` resolves or every service has stopped, then shut
    /// down.
    pub async fn wait<F: Future>(mut self, shutdown: F) -> ShutdownReport {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                joined = self.tasks.join_next() => match joined {
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!("Service task panicked: {}", e);
                    }
                    Some(_) => {}
                    None => {
                        tracing::info!("No service running");
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }

    /// Unregister every registered service concurrently, then stop all
    /// listeners.
    ///
    /// A failing or slow unregister is logged and does not hold up the others.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let registrations = std::mem::take(&mut *self.shared.registered.lock());
        let limit = self.shutdown_timeout;

        let outcomes = futures::future::join_all(registrations.into_iter().map(|reg| async move {
            tracing::info!(service = %reg.name, port = reg.port, "Unregistering service");
            let outcome = bounded(limit, reg.registrar.unregister(&reg.name, reg.port)).await;
            (reg.name, outcome)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => report.unregistered.push(name),
                Err(e) => {
                    tracing::error!(service = %name, "Unregister failed: {}", e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        report
    }
}

impl fmt::Debug for RunningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningContext")
            .field("registered", &self.registered())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MemoryDiscovery;

    fn echo() -> MethodTable {
        MethodTable::new().method("echo", |s: String, _info| async move { Ok(s) })
    }

    fn config() -> ContextConfig {
        ContextConfig::new(vec!["memory://local".to_string()]).host("127.0.0.1")
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let mut ctx = ServiceContext::new(MemoryDiscovery::default(), config());
        ctx.create_service("echo", 0, echo(), 100).unwrap();

        let err = ctx.create_service("echo", 0, echo(), 100).unwrap_err();
        assert!(matches!(err, EasycallError::Config(_)));
        assert!(ctx.create_service("", 0, echo(), 1).is_err());
        assert_eq!(ctx.services().len(), 1);
    }

    #[test]
    fn test_middleware_needs_known_service() {
        let noop = || {
            crate::middleware::from_fn(|req, resp, conn, next| {
                Box::pin(async move { next.run(req, resp, conn).await })
            })
        };
        let mut ctx = ServiceContext::new(MemoryDiscovery::default(), config());
        ctx.create_service("profile", 0, echo(), 1).unwrap();

        let err = ctx.add_middleware("profle", noop()).unwrap_err();
        assert!(matches!(err, EasycallError::Config(ref msg) if msg.contains("profle")));
        ctx.add_middleware("profile", noop()).unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = config()
            .discovery_timeout(Duration::from_secs(1))
            .shutdown_timeout(Duration::from_secs(2))
            .max_concurrent_handlers(8)
            .max_package_size(1024);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.discovery_timeout, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.server.max_concurrent_handlers, 8);
        assert_eq!(config.server.max_package_size, 1024);
        assert_eq!(ContextConfig::default().host, DEFAULT_HOST);
    }

    #[tokio::test]
    async fn test_start_registers_and_listens() {
        let discovery = MemoryDiscovery::default();
        let mut ctx = ServiceContext::new(discovery.clone(), config());
        ctx.create_service("a", 0, echo(), 10).unwrap();
        ctx.create_service("b", 0, echo(), 20).unwrap();

        let running = ctx.start().await;

        assert_eq!(running.registered().len(), 2);
        assert!(running.local_addr("a").is_some());
        assert!(running.local_addr("b").is_some());
        assert_eq!(discovery.lookup("b")[0].weight, 20);

        let report = running.shutdown().await;
        assert_eq!(report.attempts(), 2);
        assert!(report.failed.is_empty());
        assert!(discovery.is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_rolls_back_registration() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let discovery = MemoryDiscovery::default();
        let mut ctx = ServiceContext::new(discovery.clone(), config());
        ctx.create_service("clash", port, echo(), 1).unwrap();
        ctx.create_service("fine", 0, echo(), 1).unwrap();

        let running = ctx.start().await;

        assert_eq!(running.registered(), vec!["fine".to_string()]);
        assert!(running.local_addr("clash").is_none());
        assert!(discovery.lookup("clash").is_empty());
        assert_eq!(discovery.lookup("fine").len(), 1);

        running.shutdown().await;
        drop(taken);
    }

    #[tokio::test]
    async fn test_wait_returns_when_nothing_started() {
        // No endpoints: every connect fails
        let mut ctx = ServiceContext::new(MemoryDiscovery::default(), ContextConfig::default());
        ctx.create_service("lonely", 0, echo(), 1).unwrap();

        let running = ctx.start().await;
        let report = running.wait(std::future::pending::<()>()).await;
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_wait_stops_on_shutdown_future() {
        let discovery = MemoryDiscovery::default();
        let mut ctx = ServiceContext::new(discovery.clone(), config());
        ctx.create_service("a", 0, echo(), 1).unwrap();

        let running = ctx.start().await;
        let (tx, rx) = oneshot::channel::<()>();
        tx.send(()).unwrap();

        let report = running
            .wait(async move {
                let _ = rx.await;
            })
            .await;
        assert_eq!(report.unregistered, vec!["a".to_string()]);
        assert!(discovery.is_empty());
    }
}
