//! Lifecycle notification fan-out.

use headless_core::Notification;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Fire-and-forget sink for lifecycle notifications.
pub trait NotificationBus: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Delivers every notification to all live subscribers, in publish order.
#[derive(Default)]
pub struct BroadcastBus {
    subs: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subs.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }
}

impl NotificationBus for BroadcastBus {
    fn publish(&self, notification: Notification) {
        tracing::debug!(subject = %notification.subject, status = ?notification.status, "Publishing notification");
        let mut subs = self.subs.lock();
        subs.retain(|tx| tx.send(notification.clone()).is_ok());
    }
}
