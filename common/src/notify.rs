//! # `notify` channel
//!
//! A simple notification channel wrapping [`tokio::sync::mpsc`] with the
//! additional property that if multiple notifications are sent before the
//! receiver calls [`Receiver::recv`], the receiver is only notified once.
//! This prevents e.g. the treasury scheduler from running duplicate immediate
//! cycles when several callers trigger one at around the same time.

use tokio::sync::mpsc;

/// Create a new `notify` channel returning a [`Sender`] (cloneable) and
/// [`Receiver`] (not cloneable), analogous to `mpsc::channel(1)`.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::channel(1);
    (Sender(tx), Receiver(rx))
}

/// `notify` sender, analogous to `mpsc::Sender<()>`.
#[derive(Clone)]
pub struct Sender(mpsc::Sender<()>);

/// `notify` receiver, analogous to `mpsc::Receiver<()>`.
pub struct Receiver(mpsc::Receiver<()>);

impl Sender {
    /// Sends a notification to the [`Receiver`]. Dropped receivers and
    /// already-pending notifications are both fine and ignored.
    pub fn send(&self) {
        let _ = self.0.try_send(());
    }
}

impl Receiver {
    /// Waits until a notification is received over the channel. Completes
    /// immediately if a notification has already been sent. NOTE: If all
    /// [`Sender`]s have been dropped, this future never completes!
    pub async fn recv(&mut self) {
        match self.0.recv().await {
            Some(()) => (),
            None => std::future::pending().await,
        }
    }

    /// Immediately returns whether a notification has been sent.
    #[must_use]
    pub fn try_recv(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }

    /// Clears out any pending notifications in the channel.
    pub fn clear(&mut self) {
        while self.0.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn multiple_sends_coalesce() {
        let (tx, mut rx) = channel();
        tx.send();
        tx.send();
        tx.send();
        rx.recv().await;
        assert!(!rx.try_recv());
    }
}
