//! Graceful shutdown plumbing

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Broadcast-based shutdown fan-out. Every long-running loop in the process
/// holds a receiver and exits when the signal fires.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Create a fresh, untriggered signal.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Subscribe; the receiver resolves once the signal is triggered.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Fire the signal. Safe to call more than once.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges OS signals to a [`ShutdownSignal`].
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    /// Wrap a shutdown signal.
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn run(self) {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            self.signal.trigger();
        }

        #[cfg(not(unix))]
        {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("received Ctrl+C");
                    self.signal.trigger();
                }
                Err(e) => error!(error = %e, "failed to listen for Ctrl+C"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let signal = ShutdownSignal::new();
        let mut first = signal.subscribe();
        let mut second = signal.subscribe();

        signal.trigger();

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_trigger_without_subscribers_is_fine() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        // A receiver subscribed after the fact sees nothing old.
        let mut late = signal.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clone_shares_the_channel() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        let mut rx = signal.subscribe();

        clone.trigger();
        assert!(rx.try_recv().is_ok());
    }
}
