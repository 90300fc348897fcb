//! Shutdown coordination for the server and its background routines.

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Coordinator for graceful shutdown.
///
/// A one-shot broadcast: once triggered it stays triggered, and every
/// subscriber (including ones created later) observes it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.token.clone(),
        }
    }

    /// Trigger the shutdown signal. Triggering again has no effect.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Read-only view of a [`Shutdown`] handed to background routines.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Owned variant of [`ShutdownSignal::cancelled`] for `'static` futures.
    pub fn cancelled_owned(self) -> WaitForCancellationFutureOwned {
        self.token.cancelled_owned()
    }

    /// Non-blocking check, for routines polling between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_subscribers_observe_trigger() {
        let shutdown = Shutdown::new();
        let early = shutdown.subscribe();
        assert!(!early.is_cancelled());

        shutdown.trigger();
        shutdown.trigger();

        let late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), early.cancelled())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), late.cancelled_owned())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }
}
