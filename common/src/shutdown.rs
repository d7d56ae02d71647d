use std::sync::Arc;

use tokio::sync::watch;

/// The cooperative stop signal shared by every long-running loop in the
/// system (treasury settlement/monitor, funding workers, buffer observer,
/// reconciliation).
///
/// Semantics the loops rely on:
///
/// - Any clone may raise the signal; raising it twice is harmless.
/// - Waiting completes for *every* holder, including ones that start
///   waiting only after the signal was raised - a worker spawned mid
///   shutdown must still wind down promptly.
/// - Waiting never consumes the signal; once raised it stays raised for
///   the life of the process.
///
/// Internally this is a [`watch`] channel carrying a single "stopping"
/// flag. The sender half is kept alive inside the handle itself, so a
/// waiter can never observe a closed channel, and fresh receivers are
/// subscribed on demand rather than stored (which keeps [`wait`] callable
/// through `&self` inside `select!` arms).
///
/// [`wait`]: ShutdownSignal::wait
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    stopping: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (stopping, _) = watch::channel(false);
        Self {
            stopping: Arc::new(stopping),
        }
    }

    /// Raises the signal. Every current and future [`wait`] completes.
    ///
    /// [`wait`]: ShutdownSignal::wait
    pub fn signal(&self) {
        self.stopping.send_replace(true);
    }

    /// Completes once the signal has been raised; immediately if it
    /// already was.
    pub async fn wait(&self) {
        let mut rx = self.stopping.subscribe();
        // The sender lives in `self`, so this can only resolve with the
        // flag set.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Whether the signal has been raised, without waiting.
    pub fn is_signaled(&self) -> bool {
        *self.stopping.subscribe().borrow()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    const INSTANT: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn raising_twice_is_harmless() {
        let shutdown = ShutdownSignal::new();
        assert!(!shutdown.is_signaled());
        shutdown.signal();
        shutdown.signal();
        assert!(shutdown.is_signaled());
        timeout(INSTANT, shutdown.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn every_clone_observes_the_signal() {
        let shutdown = ShutdownSignal::new();
        let waiter = shutdown.clone();
        let raiser = shutdown.clone();

        let waiting = tokio::spawn(async move { waiter.wait().await });
        raiser.signal();
        timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn late_waiters_are_not_stranded() {
        let shutdown = ShutdownSignal::new();
        shutdown.signal();

        // A handle cloned after the fact must still see the raised signal.
        let late = shutdown.clone();
        assert!(late.is_signaled());
        timeout(INSTANT, late.wait()).await.unwrap();

        // And waiting a second time on the same handle also completes.
        timeout(INSTANT, shutdown.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_pends_until_raised() {
        let shutdown = ShutdownSignal::new();
        assert!(timeout(INSTANT, shutdown.wait()).await.is_err());
    }
}
