use std::future::Future;

use futures::future;
use tokio::select;
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

/// Process-wide stop signal. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<Option<&'static str>>,
}

/// Sending half of a [`Shutdown`] created with [`Shutdown::manual`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<Option<&'static str>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self, reason: &'static str) {
        let _ = self.tx.send(Some(reason));
    }
}

impl Shutdown {
    /// Listens for SIGINT and SIGTERM.
    pub fn new() -> Self {
        Self {
            rx: spawn_shutdown_listener(),
        }
    }

    pub fn manual() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(None);
        (ShutdownTrigger { tx }, Self { rx })
    }

    pub fn requested(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolves with the reason once shutdown is requested.
    pub async fn wait(&self) -> &'static str {
        let mut rx = self.rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => future::pending().await,
        }
    }
}

impl Shutdown {
    /// Resolves once shutdown is requested. Unlike [`Shutdown::wait`] the
    /// future is `Sync`, as kube's controller requires for its trigger.
    pub fn signalled(self) -> impl Future<Output = ()> + Send + Sync + 'static {
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let reason = self.wait().await;
            let _ = tx.send(());
            info!("Stopping controller ({reason}).");
        });
        async move {
            let _ = rx.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_shutdown_listener() -> watch::Receiver<Option<&'static str>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).ok();

        let term_future = async {
            if let Some(ref mut sigterm) = sigterm {
                sigterm.recv().await;
                Some("SIGTERM")
            } else {
                future::pending::<Option<&'static str>>().await
            }
        };

        select! {
            res = signal::ctrl_c() => {
                if res.is_ok() {
                    info!("Received SIGINT.");
                    let _ = shutdown_tx.send(Some("SIGINT"));
                } else {
                    warn!("Failed to listen for SIGINT: {:?}", res.err());
                }
            }
            _ = term_future => {
                info!("Received SIGTERM.");
                let _ = shutdown_tx.send(Some("SIGTERM"));
            }
        }
    });

    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_trigger_wakes_all_clones() {
        let (trigger, shutdown) = Shutdown::manual();
        let clone = shutdown.clone();
        assert!(!shutdown.requested());

        let waiter = tokio::spawn(async move { clone.wait().await });
        trigger.trigger("test");

        assert_eq!(waiter.await.unwrap(), "test");
        assert!(shutdown.requested());
    }

    #[tokio::test]
    async fn test_signalled_resolves_after_trigger() {
        let (trigger, shutdown) = Shutdown::manual();
        let signalled = tokio::spawn(shutdown.signalled());
        tokio::task::yield_now().await;
        assert!(!signalled.is_finished());

        trigger.trigger("test");
        signalled.await.unwrap();
    }
}
