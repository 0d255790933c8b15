//! Termination signal listener.
//!
//! SIGHUP, SIGINT, SIGTERM and SIGQUIT all request shutdown. Handlers are
//! installed when the listener is created, so a signal arriving between
//! creation and the first [`TerminationListener::recv`] is not lost.

use std::fmt;

use crate::error::Result;

/// A signal that requests shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGHUP
    Hangup,
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationSignal::Hangup => "SIGHUP",
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Waits for the first termination signal.
#[cfg(unix)]
pub struct TerminationListener {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationListener {
    /// Install the signal handlers. Must be called inside a tokio runtime.
    pub fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> TerminationSignal {
        let received = tokio::select! {
            _ = self.hangup.recv() => TerminationSignal::Hangup,
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.quit.recv() => TerminationSignal::Quit,
        };
        tracing::info!("Received {}, shutting down", received);
        received
    }
}

/// Waits for Ctrl+C, the only termination signal on this platform.
#[cfg(not(unix))]
pub struct TerminationListener {
    _private: (),
}

#[cfg(not(unix))]
impl TerminationListener {
    /// Create the listener.
    pub fn new() -> Result<Self> {
        Ok(Self { _private: () })
    }

    /// Wait for Ctrl+C.
    pub async fn recv(&mut self) -> TerminationSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
        TerminationSignal::Interrupt
    }
}

impl fmt::Debug for TerminationListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationListener").finish_non_exhaustive()
    }
}
