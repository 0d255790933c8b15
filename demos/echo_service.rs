//! Echo Service - hosting a service with middleware.
//!
//! This demo:
//! - Hosts an `echo` service through a `ServiceContext`
//! - Adds a logging interceptor and a token check interceptor
//! - Calls the service once from an in-process client
//! - Waits for SIGINT/SIGTERM/SIGHUP/SIGQUIT, then unregisters and exits
//!
//! ```sh
//! RUST_LOG=debug cargo run --example echo_service
//! ```

use easycall::middleware::from_fn;
use easycall::{
    ClientConfig, ContextConfig, MemoryDiscovery, MethodTable, ServiceClient, ServiceContext,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    token: String,
    message: String,
}

/// Output of the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

const PORT: u16 = 10028;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let discovery = MemoryDiscovery::default();
    let config = ContextConfig::new(vec!["memory://local".to_string()]).host("127.0.0.1");
    let mut ctx = ServiceContext::new(discovery.clone(), config);

    let echo = MethodTable::new().method("echo", |input: EchoInput, info| async move {
        tracing::info!(remote = %info.remote_addr, "echo {}", input.message);
        Ok(EchoOutput {
            echo: input.message,
        })
    });
    ctx.create_service("echo", PORT, echo, 100)?;

    ctx.add_middleware(
        "echo",
        from_fn(|req, resp, conn, next| {
            Box::pin(async move {
                let started = req.received_at();
                next.run(req, resp, conn).await;
                tracing::info!(
                    method = req.method(),
                    ret = resp.ret(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "call finished"
                );
            })
        }),
    )?;

    ctx.add_middleware(
        "echo",
        from_fn(|req, resp, conn, next| {
            Box::pin(async move {
                let authorized = req
                    .body_as::<EchoInput>()
                    .map(|input| input.token == "secret")
                    .unwrap_or(false);
                if !authorized {
                    resp.set_error(401, "invalid token");
                    return;
                }
                next.run(req, resp, conn).await;
            })
        }),
    )?;

    let running = ctx.start().await;
    tracing::info!("registered: {:?}", discovery.lookup("echo"));

    let client = ServiceClient::connect(("127.0.0.1", PORT), "echo", ClientConfig::default()).await?;
    let reply: EchoOutput = client
        .call(
            "echo",
            &EchoInput {
                token: "secret".to_string(),
                message: "hello".to_string(),
            },
        )
        .await?;
    tracing::info!("reply: {:?}", reply);

    let denied = client
        .call::<_, EchoOutput>(
            "echo",
            &EchoInput {
                token: "guess".to_string(),
                message: "let me in".to_string(),
            },
        )
        .await;
    tracing::info!("without token: {:?}", denied.map_err(|e| e.to_string()));

    let mut signals = easycall::signal::TerminationListener::new()?;
    let report = running
        .wait(async move {
            signals.recv().await;
        })
        .await;
    tracing::info!(
        "unregistered {:?}, failed {:?}",
        report.unregistered,
        report.failed
    );

    Ok(())
}
