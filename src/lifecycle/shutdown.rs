//! Shutdown coordination primitives.

use tokio::sync::{broadcast, watch};

/// Close trigger for long-running loops.
///
/// Provides a broadcast channel that background tasks subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the trigger. Never blocks; a no-op without subscribers.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner side of a one-shot "stopped" signal.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Mark as stopped. Later calls change nothing.
    pub fn notify(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> StopNotification {
        StopNotification {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Waitable side of a [`StopHandle`]. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct StopNotification {
    rx: watch::Receiver<bool>,
}

impl StopNotification {
    /// Resolve once stopped, immediately if that already happened.
    /// A dropped [`StopHandle`] also counts as stopped.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        shutdown.trigger();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_notification_is_one_shot() {
        let handle = StopHandle::new();
        let notification = handle.subscribe();
        assert!(!notification.is_stopped());

        let waiter = tokio::spawn(notification.clone().wait());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.notify();
        handle.notify();
        waiter.await.unwrap();

        // late subscribers see the stop right away
        handle.subscribe().wait().await;
        assert!(notification.is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_waiters() {
        let handle = StopHandle::new();
        let notification = handle.subscribe();
        drop(handle);
        notification.wait().await;
    }
}
