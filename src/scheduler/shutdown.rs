//! Shutdown coordination.
//!
//! [`ShutdownSignal`] is the run-wide cancellation flag shared by the
//! supervisor and every worker. It only ever moves forward:
//! `Running → Graceful → Immediate`.
//!
//! [`LivenessGuard`] lets workers notice that the supervisor that spawned
//! them is gone, so they stop instead of lingering as orphans.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::supervisor::SupervisorHandle;

/// Current shutdown state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShutdownState {
    /// Normal operation.
    Running,
    /// Workers should finish in-flight work and exit.
    Graceful,
    /// Workers are about to be aborted.
    Immediate,
}

/// Kind of shutdown being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Let workers drain, up to the graceful timeout.
    Graceful,
    /// Abort workers without waiting.
    Immediate,
}

impl From<ShutdownKind> for ShutdownState {
    fn from(kind: ShutdownKind) -> Self {
        match kind {
            ShutdownKind::Graceful => ShutdownState::Graceful,
            ShutdownKind::Immediate => ShutdownState::Immediate,
        }
    }
}

/// Monotonic run-wide shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<ShutdownState>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Creates a signal in the `Running` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ShutdownState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a shutdown.
    ///
    /// Returns `true` if the state advanced. Requests that would move the
    /// state backwards (graceful after immediate) are ignored.
    pub fn trigger(&self, kind: ShutdownKind) -> bool {
        let target = ShutdownState::from(kind);
        self.tx.send_if_modified(|state| {
            if target > *state {
                *state = target;
                true
            } else {
                false
            }
        })
    }

    /// Current state.
    pub fn state(&self) -> ShutdownState {
        *self.tx.borrow()
    }

    /// Returns whether any shutdown has been requested.
    pub fn is_set(&self) -> bool {
        self.state() != ShutdownState::Running
    }

    /// Completes once any shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
    }
}

/// Held by the supervisor for as long as it runs.
#[derive(Debug, Default)]
pub struct LivenessGuard {
    alive: Arc<()>,
}

impl LivenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a probe that reports whether this guard still exists.
    pub fn probe(&self) -> LivenessProbe {
        LivenessProbe {
            alive: Arc::downgrade(&self.alive),
        }
    }
}

/// Worker-side view of a [`LivenessGuard`].
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    alive: Weak<()>,
}

impl LivenessProbe {
    /// Returns false once the guard has been dropped.
    pub fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// Installs SIGINT/SIGTERM handling for a running supervisor.
///
/// The first signal requests a graceful shutdown; a second one escalates
/// to an immediate shutdown. The returned task ends after the second
/// signal, or right away if the handlers cannot be registered.
pub fn listen_for_signals(handle: SupervisorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match TerminationSignals::register() {
            Ok(signals) => signals,
            Err(e) => {
                error!(error = %e, "Failed to register signal handlers");
                return;
            }
        };

        match signals.recv().await {
            Ok(name) => info!(signal = name, "Received signal, shutting down gracefully"),
            Err(e) => {
                error!(error = %e, "Failed to listen for signals");
                return;
            }
        }
        handle.shutdown();

        if let Ok(name) = signals.recv().await {
            warn!(signal = name, "Received second signal, terminating workers");
            handle.kill();
        }
    })
}

struct TerminationSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            sigterm: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
                _ = self.sigterm.recv() => Ok("SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
        }
    }
}
