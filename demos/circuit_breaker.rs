//! Circuit Breaker - guarding a flaky dependency.
//!
//! A primary call fails for its first attempts and recovers afterwards. The
//! breaker opens after five consecutive failures, serves the fallback while
//! open, then lets a single trial call through once the cool-down elapses.
//!
//! ```sh
//! RUST_LOG=easycall=debug cargo run --example circuit_breaker
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use easycall::{BreakerConfig, BreakerRegistry};
use tracing_subscriber::EnvFilter;

/// Attempts that fail before the dependency recovers.
const FAILING_ATTEMPTS: u32 = 7;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let breakers = BreakerRegistry::new(BreakerConfig::new(5, Duration::from_millis(500)));
    let attempts = AtomicU32::new(0);

    for round in 1..=16 {
        let result = breakers
            .call(
                "inventory.lookup",
                || async {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt <= FAILING_ATTEMPTS {
                        Err(format!("attempt {} refused", attempt))
                    } else {
                        Ok(format!("live stock (attempt {})", attempt))
                    }
                },
                || async { Ok::<_, String>("cached stock".to_string()) },
            )
            .await;

        tracing::info!(
            round,
            state = ?breakers.state("inventory.lookup"),
            "result: {:?}",
            result
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
