// ABOUTME: Cooperative cancellation signal for deployment operations.
// ABOUTME: Watch-based; element tasks observe it between suspension points.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::EngineError;

/// Triggers cancellation of a deploy or destroy operation.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed cooperatively by the orchestrator's group barrier and by
/// in-flight element tasks; tasks are never forcibly killed.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires, for operations without a caller-driven
    /// cancellation path.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when cancellation is requested. Pends forever when the
    /// handle has been dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a connected cancellation handle and signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Sleeps for the given duration unless cancellation fires first.
pub(crate) async fn sleep_or_cancel(
    cancel: &CancelSignal,
    wait: Duration,
) -> Result<(), EngineError> {
    tokio::select! {
        _ = tokio::time::sleep(wait) => Ok(()),
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_fires_the_signal() {
        let (handle, signal) = cancellation();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_cancelled() {
        let (handle, signal) = cancellation();
        handle.cancel();
        let result = sleep_or_cancel(&signal, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn never_signal_does_not_fire() {
        let signal = CancelSignal::never();
        let timeout =
            tokio::time::timeout(Duration::from_millis(10), signal.cancelled()).await;
        assert!(timeout.is_err(), "never() must not complete");
    }
}
