use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code
    Requested,
}

/// Fans one shutdown signal out to every subscriber.
///
/// `axum::serve(..).with_graceful_shutdown(..)` stops accepting on the first
/// signal and lets in-flight requests finish; `drain_timeout` bounds that wait.
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// 30 second drain timeout.
    pub fn new() -> Self {
        Self::with_drain_timeout(Duration::from_secs(30))
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Only the first call broadcasts; later ones are ignored.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown initiated: {:?}", reason);
            // no receivers simply means nobody is waiting yet
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM and broadcast it.
    pub async fn run_signal_handler(&self) {
        tracing::debug!("Signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
                tracing::info!("Received SIGINT, shutting down gracefully");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }
    }

    /// Resolves once a shutdown has been broadcast. Suitable as the future passed
    /// to `with_graceful_shutdown`.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }

        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!("Shutdown channel closed unexpectedly");
                ShutdownReason::Requested
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_waiters() {
        let shutdown = GracefulShutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait_for_shutdown_signal().await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.trigger_shutdown(ShutdownReason::Terminate);
        let reason = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(
            reason,
            ShutdownReason::Terminate | ShutdownReason::Requested
        ));
        assert!(shutdown.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let shutdown = GracefulShutdown::with_drain_timeout(Duration::from_secs(5));
        shutdown.trigger_shutdown(ShutdownReason::Requested);
        shutdown.trigger_shutdown(ShutdownReason::Interrupt);

        let reason = timeout(Duration::from_secs(1), shutdown.wait_for_shutdown_signal())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
        assert_eq!(shutdown.drain_timeout(), Duration::from_secs(5));
    }
}
