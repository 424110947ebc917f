//! Block-arrival notification for the follower.

use tokio::sync::mpsc::{self, error::TrySendError};

/// Sending half, handed to whatever learns about new blocks first
/// (a node push notification, a ZMQ subscriber, a test).
#[derive(Debug, Clone)]
pub struct BlockNotifier {
    tx: mpsc::Sender<()>,
}

impl BlockNotifier {
    /// Signal that a block may have arrived. Never blocks.
    ///
    /// At most one notification is pending; extra ones are coalesced.
    /// Returns `false` once the follower has gone away.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Receiving half, consumed by the follower ingester.
#[derive(Debug)]
pub struct BlockSignal {
    rx: mpsc::Receiver<()>,
}

impl BlockSignal {
    /// Wait for the next notification; `None` once every notifier is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// A connected notifier/signal pair.
pub fn block_signal() -> (BlockNotifier, BlockSignal) {
    let (tx, rx) = mpsc::channel(1);
    (BlockNotifier { tx }, BlockSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifications_coalesce() {
        let (notifier, mut signal) = block_signal();
        assert!(notifier.notify());
        assert!(notifier.notify());
        assert!(notifier.notify());

        assert_eq!(signal.recv().await, Some(()));
        assert!(signal.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_ends() {
        let (notifier, mut signal) = block_signal();
        drop(notifier);
        assert_eq!(signal.recv().await, None);

        let (notifier, signal) = block_signal();
        drop(signal);
        assert!(!notifier.notify());
    }
}
