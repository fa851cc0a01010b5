//! Cooperative stop signal
//!
//! One watch channel shared by everything in the balancer that blocks:
//! the inter-cycle sleep lives here, and the migration-job polling loop
//! holds a receiver, so the first SIGTERM/SIGINT cuts both short instead
//! of waiting out a 10-minute interval or a 30-minute poll.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Request a stop; every watcher wakes immediately.
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }

    /// Receiver for suspension points that select on the signal, such as
    /// the job polling loop.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Sleep between balance cycles. Returns `false` when the sleep was
    /// cut short (or skipped entirely) by a stop request.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = rx.changed() => !*rx.borrow(),
        }
    }

    /// Turn the first stop signal from the OS into a stop request.
    pub async fn listen(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (Ok(mut sigterm), Ok(mut sigint)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) else {
                error!("Could not install signal handlers; OS signals will not stop the balancer");
                return;
            };

            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            info!("{} received, stopping after the current operation", received);
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("Could not install signal handlers; OS signals will not stop the balancer");
                return;
            }
            info!("Ctrl+C received, stopping after the current operation");
        }

        self.request();
    }
}
