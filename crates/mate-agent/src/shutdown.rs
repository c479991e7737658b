use std::sync::Arc;
use tokio::sync::watch;

/// One-way stop flag shared between tasks. The process owns one for its
/// lifetime; each connection epoch owns a fresh one, so senders retired with
/// an old epoch can never observe a newer epoch's state.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called; immediately if it already was.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clones_observe_the_same_stop() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_stopped());

        let waiter = tokio::spawn(async move { observer.stopped().await });
        signal.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stopped() resolves")
            .expect("join");
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_when_already_stopped() {
        let signal = StopSignal::new();
        signal.stop();
        tokio::time::timeout(Duration::from_millis(100), signal.stopped())
            .await
            .expect("no wait needed");
    }
}
