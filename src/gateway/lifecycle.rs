//! Process lifecycle: shutdown ordering and fault policy
//!
//! Shutdown always runs in this order:
//!
//! 1. close every session (streams end, peers are released)
//! 2. tell the HTTP server to stop accepting
//! 3. wait for the server to finish, bounded by `shutdown_timeout`
//!
//! A panic anywhere is fatal and triggers the same sequence. A detached
//! background task that fails is logged and counted; the process keeps running.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::streaming::{CloseSummary, SessionRegistry};
use crate::Result;

/// Why shutdown started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Panic, or the server stopped on its own
    Fatal,
}

/// How teardown went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Server finished within the timeout
    Clean,
    /// Server finished with an error
    Failed(String),
    /// Teardown exceeded the timeout
    TimedOut,
}

/// Result of a shutdown sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Trigger
    pub reason: ShutdownReason,
    /// Teardown result
    pub outcome: ShutdownOutcome,
    /// Session close results
    pub sessions: CloseSummary,
}

impl ShutdownReport {
    /// Process exit code for this report: 0 after a clean teardown, whatever
    /// started it
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            ShutdownOutcome::Clean => 0,
            ShutdownOutcome::Failed(_) | ShutdownOutcome::TimedOut => 1,
        }
    }

    /// Whether the process must exit without waiting for remaining tasks
    #[must_use]
    pub fn requires_forced_exit(&self) -> bool {
        self.outcome == ShutdownOutcome::TimedOut
    }
}

/// Coordinates shutdown for one server instance
#[derive(Clone)]
pub struct LifecycleController {
    registry: SessionRegistry,
    shutdown_timeout: Duration,
    stop_accepting: CancellationToken,
    fatal: CancellationToken,
    swallowed: Arc<AtomicU64>,
}

impl LifecycleController {
    /// Create a controller over `registry`
    pub fn new(registry: SessionRegistry, shutdown_timeout: Duration) -> Self {
        Self {
            registry,
            shutdown_timeout,
            stop_accepting: CancellationToken::new(),
            fatal: CancellationToken::new(),
            swallowed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Token cancelled once the server must stop accepting connections
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Request a fatal shutdown
    pub fn trigger_fatal(&self) {
        self.fatal.cancel();
    }

    /// Make every panic trigger a fatal shutdown. The previous hook still runs.
    pub fn install_panic_hook(&self) {
        let fatal = self.fatal.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            error!(panic = %panic_info, "Uncaught panic, starting fatal shutdown");
            fatal.cancel();
            previous(panic_info);
        }));
    }

    /// Wait for SIGINT, SIGTERM, or a fatal trigger
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            () = ctrl_c => ShutdownReason::Interrupt,
            () = terminate => ShutdownReason::Terminate,
            () = self.fatal.cancelled() => ShutdownReason::Fatal,
        };
        info!(reason = ?reason, "Shutdown signal received");
        reason
    }

    /// Run the shutdown sequence; `server` resolves once the server has torn down
    pub async fn shutdown<F>(&self, reason: ShutdownReason, server: F) -> ShutdownReport
    where
        F: Future<Output = Result<()>>,
    {
        let deadline = Instant::now() + self.shutdown_timeout;
        info!(reason = ?reason, timeout = ?self.shutdown_timeout, "Shutting down");

        let sessions = match timeout_at(deadline, self.registry.close_all()).await {
            Ok(summary) => summary,
            Err(_) => {
                self.stop_accepting.cancel();
                error!("Timed out closing sessions");
                return ShutdownReport {
                    reason,
                    outcome: ShutdownOutcome::TimedOut,
                    sessions: CloseSummary::default(),
                };
            }
        };
        info!(closed = sessions.closed, failed = sessions.failed, "Sessions closed");

        self.stop_accepting.cancel();

        let outcome = match timeout_at(deadline, server).await {
            Ok(Ok(())) => ShutdownOutcome::Clean,
            Ok(Err(e)) => {
                error!(error = %e, "Server stopped with an error");
                ShutdownOutcome::Failed(e.to_string())
            }
            Err(_) => {
                error!(timeout = ?self.shutdown_timeout, "Server did not stop in time");
                ShutdownOutcome::TimedOut
            }
        };

        ShutdownReport {
            reason,
            outcome,
            sessions,
        }
    }

    /// Run background work whose failure is logged and counted, never fatal
    pub fn spawn_detached<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let swallowed = Arc::clone(&self.swallowed);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                swallowed.fetch_add(1, Ordering::Relaxed);
                telemetry_metrics::counter!("bridge_swallowed_async_errors_total", "task" => name)
                    .increment(1);
                warn!(task = name, error = %e, "Background task failed; continuing");
            }
        })
    }

    /// Number of background failures swallowed so far
    #[must_use]
    pub fn swallowed_async_errors(&self) -> u64 {
        self.swallowed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::config::StreamingConfig;
    use crate::gateway::streaming::SessionTransport;
    use crate::protocol::BridgeHandler;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(&StreamingConfig::default(), Arc::new(BridgeHandler::new()))
    }

    /// Records whether the stop token was already cancelled when close ran
    struct CloseOrderRecorder {
        stop: CancellationToken,
        seen_stopped: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl SessionTransport for CloseOrderRecorder {
        async fn handle_message(&self, _message: Value) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.seen_stopped.lock().push(self.stop.is_cancelled());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sessions_close_before_stop_accepting() {
        let registry = registry();
        let lifecycle = LifecycleController::new(registry.clone(), Duration::from_secs(5));
        let recorder = Arc::new(CloseOrderRecorder {
            stop: lifecycle.stop_token(),
            seen_stopped: Mutex::new(Vec::new()),
        });
        for _ in 0..2 {
            let p = Arc::clone(&recorder);
            registry
                .create_session_with(None, move |_| Ok(p as Arc<dyn SessionTransport>))
                .unwrap();
        }

        let stop = lifecycle.stop_token();
        let observed = registry.clone();
        let server = async move {
            stop.cancelled().await;
            assert_eq!(observed.session_count(), 0);
            Ok(())
        };

        let report = lifecycle.shutdown(ShutdownReason::Terminate, server).await;
        assert_eq!(*recorder.seen_stopped.lock(), vec![false, false]);
        assert_eq!(report.sessions.closed, 2);
        assert_eq!(report.outcome, ShutdownOutcome::Clean);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn hung_server_times_out_with_nonzero_exit() {
        let lifecycle = LifecycleController::new(registry(), Duration::from_millis(50));
        let report = lifecycle
            .shutdown(ShutdownReason::Interrupt, std::future::pending::<Result<()>>())
            .await;

        assert_eq!(report.outcome, ShutdownOutcome::TimedOut);
        assert!(report.requires_forced_exit());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn exit_code_follows_teardown_outcome() {
        let lifecycle = LifecycleController::new(registry(), Duration::from_secs(1));
        let failed = lifecycle
            .shutdown(ShutdownReason::Terminate, async {
                Err(Error::Internal("listener error".into()))
            })
            .await;
        assert!(matches!(failed.outcome, ShutdownOutcome::Failed(_)));
        assert_eq!(failed.exit_code(), 1);

        let fatal = lifecycle
            .shutdown(ShutdownReason::Fatal, async { Ok(()) })
            .await;
        assert_eq!(fatal.outcome, ShutdownOutcome::Clean);
        assert_eq!(fatal.exit_code(), 0);
    }

    #[tokio::test]
    async fn detached_failures_are_counted_not_fatal() {
        let lifecycle = LifecycleController::new(registry(), Duration::from_secs(1));
        lifecycle
            .spawn_detached("boom", async { Err(Error::Internal("nope".into())) })
            .await
            .unwrap();
        lifecycle
            .spawn_detached("fine", async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(lifecycle.swallowed_async_errors(), 1);
        assert!(!lifecycle.stop_token().is_cancelled());
    }

    #[tokio::test]
    async fn fatal_trigger_wakes_signal_waiter() {
        let lifecycle = LifecycleController::new(registry(), Duration::from_secs(1));
        lifecycle.trigger_fatal();
        assert_eq!(lifecycle.wait_for_signal().await, ShutdownReason::Fatal);
    }
}
