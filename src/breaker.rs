//! Circuit breaker guarding named call-sites.
//!
//! States:
//! - Closed: calls run the primary; consecutive failures are counted and
//!   reaching the threshold opens the circuit
//! - Open: calls run only the fallback until the cool-down has elapsed; the
//!   first call after that becomes the trial
//! - HalfOpen: exactly one trial call runs the primary; success closes the
//!   circuit, failure opens it again with a fresh cool-down
//!
//! Every transition for a name happens under that name's lock, so concurrent
//! callers see one consistent state and at most one trial is in flight. The
//! fallback is never guarded: its result, error included, goes back to the
//! caller as is.
//!
//! # Example
//!
//! ```ignore
//! use easycall::breaker::BreakerRegistry;
//!
//! let breakers = BreakerRegistry::default();
//! let profile = breakers
//!     .call("profile.get", || fetch_remote(uid), || fetch_cached(uid))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Default consecutive failures that open a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time a circuit stays open before a trial call.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(10);

/// Thresholds for one call-site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed that open the circuit (minimum 1).
    pub failure_threshold: u32,
    /// Time spent Open before the next call becomes a trial.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cool_down: DEFAULT_COOL_DOWN,
        }
    }
}

impl BreakerConfig {
    /// Create a config.
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cool_down,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Primary bypassed.
    Open,
    /// One trial call probing recovery.
    HalfOpen,
}

/// Snapshot of one call-site's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    /// Call-site name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive primary failures.
    pub consecutive_failures: u32,
    /// When the primary last failed.
    pub last_failure: Option<Instant>,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// Whether a trial call is running.
    pub trial_in_flight: bool,
    /// Thresholds in effect.
    pub config: BreakerConfig,
}

impl BreakerState {
    fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            trial_in_flight: false,
            config,
        }
    }

    /// Decide how the next call runs. May move Open to HalfOpen.
    fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Primary,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |opened| now.duration_since(opened) >= self.config.cool_down);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    tracing::info!(name = %self.name, "Circuit breaker half-open, running trial call");
                    Admission::Trial
                } else {
                    Admission::Fallback
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Fallback
                } else {
                    self.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Apply the outcome of a primary call.
    fn record(&mut self, admission: Admission, success: bool, now: Instant) {
        match (admission, success) {
            (Admission::Trial, true) => {
                self.trial_in_flight = false;
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                tracing::info!(name = %self.name, "Circuit breaker closed after successful trial");
            }
            (Admission::Trial, false) => {
                self.trial_in_flight = false;
                self.state = CircuitState::Open;
                self.last_failure = Some(now);
                self.opened_at = Some(now);
                tracing::warn!(name = %self.name, "Circuit breaker reopened after failed trial");
            }
            (Admission::Primary, true) => {
                // A call admitted before the circuit opened must not close it
                if self.state == CircuitState::Closed {
                    self.consecutive_failures = 0;
                }
            }
            (Admission::Primary, false) => {
                self.last_failure = Some(now);
                if self.state != CircuitState::Closed {
                    return;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    tracing::warn!(
                        name = %self.name,
                        failures = self.consecutive_failures,
                        "Circuit breaker opened"
                    );
                }
            }
            (Admission::Fallback, _) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Primary,
    Trial,
    Fallback,
}

type Shared = Arc<Mutex<BreakerState>>;

/// Releases the trial slot if a trial call is dropped before it records.
struct TrialGuard {
    state: Shared,
    armed: bool,
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().trial_in_flight = false;
        }
    }
}

struct Inner {
    default_config: BreakerConfig,
    overrides: Mutex<HashMap<String, BreakerConfig>>,
    states: Mutex<HashMap<String, Shared>>,
}

/// Breakers keyed by call-site name, created on first use.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BreakerRegistry {
    inner: Arc<Inner>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl BreakerRegistry {
    /// Create a registry applying `default_config` to every name without an
    /// override.
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                default_config,
                overrides: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Override thresholds for one name.
    ///
    /// Applies immediately if the breaker already exists.
    pub fn configure(&self, name: &str, config: BreakerConfig) {
        self.inner.overrides.lock().insert(name.to_string(), config);
        if let Some(state) = self.inner.states.lock().get(name) {
            state.lock().config = config;
        }
    }

    /// Thresholds a name runs with.
    pub fn config_for(&self, name: &str) -> BreakerConfig {
        self.inner
            .overrides
            .lock()
            .get(name)
            .copied()
            .unwrap_or(self.inner.default_config)
    }

    /// Snapshot of a breaker, if it has been used.
    pub fn snapshot(&self, name: &str) -> Option<BreakerState> {
        let shared = self.inner.states.lock().get(name).cloned();
        shared.map(|state| state.lock().clone())
    }

    /// Current state of a breaker. Unused names are Closed.
    pub fn state(&self, name: &str) -> CircuitState {
        self.snapshot(name)
            .map_or(CircuitState::Closed, |snapshot| snapshot.state)
    }

    /// Names with a breaker, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.states.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn entry(&self, name: &str) -> Shared {
        let mut states = self.inner.states.lock();
        if let Some(state) = states.get(name) {
            return state.clone();
        }
        let state = Arc::new(Mutex::new(BreakerState::new(name, self.config_for(name))));
        states.insert(name.to_string(), state.clone());
        state
    }

    /// Run `primary` through the breaker for `name`, or `fallback` when the
    /// circuit is open.
    ///
    /// A primary error while Closed is returned to the caller and counted; the
    /// fallback only runs when the primary is bypassed.
    pub async fn call<T, E, P, PF, F, FF>(&self, name: &str, primary: P, fallback: F) -> Result<T, E>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, E>>,
        F: FnOnce() -> FF,
        FF: Future<Output = Result<T, E>>,
    {
        let state = self.entry(name);
        let admission = state.lock().admit(Instant::now());

        if admission == Admission::Fallback {
            tracing::debug!(name, "Circuit open, running fallback");
            return fallback().await;
        }

        let mut guard = TrialGuard {
            state: state.clone(),
            armed: admission == Admission::Trial,
        };

        let result = primary().await;

        guard.armed = false;
        state.lock().record(admission, result.is_ok(), Instant::now());
        result
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("default_config", &self.inner.default_config)
            .field("breakers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        primary: AtomicUsize,
        fallback: AtomicUsize,
    }

    async fn run(breakers: &BreakerRegistry, counts: &Counts, succeed: bool) -> Result<&'static str, String> {
        breakers
            .call(
                "remote",
                || async {
                    counts.primary.fetch_add(1, Ordering::SeqCst);
                    if succeed {
                        Ok("primary")
                    } else {
                        Err("primary failed".to_string())
                    }
                },
                || async {
                    counts.fallback.fetch_add(1, Ordering::SeqCst);
                    Ok("fallback")
                },
            )
            .await
    }

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig::new(5, Duration::from_secs(10)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_scenario() {
        let breakers = registry();
        let counts = Counts::default();

        // Five consecutive failures open the circuit
        for _ in 0..5 {
            assert!(run(&breakers, &counts, false).await.is_err());
        }
        assert_eq!(breakers.state("remote"), CircuitState::Open);
        assert_eq!(counts.primary.load(Ordering::SeqCst), 5);

        // Calls 6-10 inside the cool-down only reach the fallback
        for _ in 0..5 {
            assert_eq!(run(&breakers, &counts, true).await.unwrap(), "fallback");
        }
        assert_eq!(counts.primary.load(Ordering::SeqCst), 5);
        assert_eq!(counts.fallback.load(Ordering::SeqCst), 5);

        // After the cool-down the next call is a trial
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(run(&breakers, &counts, true).await.unwrap(), "primary");

        let snapshot = breakers.snapshot("remote").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(!snapshot.trial_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_restarts_cool_down() {
        let breakers = registry();
        let counts = Counts::default();

        for _ in 0..5 {
            let _ = run(&breakers, &counts, false).await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(run(&breakers, &counts, false).await.is_err());
        assert_eq!(breakers.state("remote"), CircuitState::Open);
        assert_eq!(counts.primary.load(Ordering::SeqCst), 6);

        // Cool-down counts from the failed trial
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(run(&breakers, &counts, true).await.unwrap(), "fallback");
        assert_eq!(counts.primary.load(Ordering::SeqCst), 6);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(run(&breakers, &counts, true).await.unwrap(), "primary");
        assert_eq!(breakers.state("remote"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breakers = registry();
        let counts = Counts::default();

        for _ in 0..4 {
            let _ = run(&breakers, &counts, false).await;
        }
        assert_eq!(breakers.snapshot("remote").unwrap().consecutive_failures, 4);

        run(&breakers, &counts, true).await.unwrap();
        assert_eq!(breakers.snapshot("remote").unwrap().consecutive_failures, 0);

        for _ in 0..4 {
            let _ = run(&breakers, &counts, false).await;
        }
        assert_eq!(breakers.state("remote"), CircuitState::Closed);
        assert_eq!(counts.fallback.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_in_flight() {
        let breakers = BreakerRegistry::new(BreakerConfig::new(1, Duration::from_secs(1)));
        let _ = breakers
            .call("slow", || async { Err::<u32, u32>(0) }, || async { Ok(0) })
            .await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breakers = breakers.clone();
        let trial = tokio::spawn(async move {
            trial_breakers
                .call(
                    "slow",
                    || async move {
                        let _ = started_tx.send(());
                        let _ = finish_rx.await;
                        Ok::<u32, u32>(1)
                    },
                    || async { Ok(2) },
                )
                .await
        });
        started_rx.await.unwrap();

        // Concurrent caller during the trial gets the fallback
        let concurrent = breakers
            .call("slow", || async { Ok::<u32, u32>(1) }, || async { Ok(2) })
            .await;
        assert_eq!(concurrent, Ok(2));
        assert_eq!(breakers.state("slow"), CircuitState::HalfOpen);

        finish_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok(1));
        assert_eq!(breakers.state("slow"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let breakers = BreakerRegistry::new(BreakerConfig::new(1, Duration::from_secs(1)));
        let _ = breakers
            .call("x", || async { Err::<u32, u32>(0) }, || async { Ok(0) })
            .await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = breakers.call("x", || std::future::pending::<Result<u32, u32>>(), || async { Ok(0) });
        let _ = tokio::time::timeout(Duration::from_millis(10), trial).await;
        assert!(!breakers.snapshot("x").unwrap().trial_in_flight);

        let retry = breakers.call("x", || async { Ok::<u32, u32>(7) }, || async { Ok(0) }).await;
        assert_eq!(retry, Ok(7));
        assert_eq!(breakers.state("x"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_fallback_error_passes_through() {
        let breakers = BreakerRegistry::new(BreakerConfig::new(1, Duration::from_secs(60)));
        let _ = breakers
            .call("dep", || async { Err::<u32, String>("down".into()) }, || async { Ok(0) })
            .await;

        let result = breakers
            .call(
                "dep",
                || async { Ok::<u32, String>(1) },
                || async { Err("fallback down".to_string()) },
            )
            .await;
        assert_eq!(result, Err("fallback down".to_string()));
    }

    #[test]
    fn test_per_name_config() {
        let breakers = BreakerRegistry::default();
        breakers.configure("fast", BreakerConfig::new(2, Duration::from_secs(1)));

        assert_eq!(breakers.config_for("fast").failure_threshold, 2);
        assert_eq!(breakers.config_for("other"), BreakerConfig::default());
        assert_eq!(breakers.state("unused"), CircuitState::Closed);
        assert!(breakers.names().is_empty());
        assert_eq!(BreakerConfig::new(0, Duration::ZERO).failure_threshold, 1);
    }
}
