//! In-process notification fan-out
//!
//! One broadcast channel carries every notification. Each subscriber
//! filters by recipient id, so a WebSocket only ever sees events for the
//! principal that opened it.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::Notification;

/// Events buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub shared by handlers and WebSocket sessions
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Arc<Notification>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every subscriber. Returns how many live subscribers
    /// received it; zero is normal when nobody is connected.
    pub fn publish(&self, notification: Notification) -> usize {
        self.sender.send(Arc::new(notification)).unwrap_or(0)
    }

    /// Receive notifications addressed to `recipient_id`
    pub fn subscribe(&self, recipient_id: Uuid) -> Subscription {
        Subscription {
            recipient_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A recipient-filtered view of the hub
#[derive(Debug)]
pub struct Subscription {
    recipient_id: Uuid,
    receiver: broadcast::Receiver<Arc<Notification>>,
}

impl Subscription {
    /// Next notification for this recipient, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.recipient_id == self.recipient_id => {
                    return Some(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        recipient_id = %self.recipient_id,
                        skipped,
                        "Notification subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{Notice, NotificationKind};

    fn notification_for(recipient_id: Uuid) -> Notification {
        Notice::new(
            recipient_id,
            NotificationKind::WalletUpdated,
            "Wallet updated",
            "تم تحديث المحفظة",
        )
        .into_notification()
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_own_notifications() {
        let hub = NotificationHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut subscription = hub.subscribe(alice);
        assert_eq!(hub.publish(notification_for(bob)), 1);
        hub.publish(notification_for(alice));

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.recipient_id, alice);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = NotificationHub::new();
        assert_eq!(hub.publish(notification_for(Uuid::new_v4())), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let hub = NotificationHub::with_capacity(2);
        let recipient = Uuid::new_v4();
        let mut subscription = hub.subscribe(recipient);

        let mut last = None;
        for _ in 0..5 {
            let notification = notification_for(recipient);
            last = Some(notification.id);
            hub.publish(notification);
        }

        // The two newest survive; the first recv after lagging returns the older one.
        let first = subscription.recv().await.unwrap();
        let second = subscription.recv().await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(Some(second.id), last);
    }

    #[tokio::test]
    async fn test_recv_ends_when_hub_dropped() {
        let hub = NotificationHub::new();
        let mut subscription = hub.subscribe(Uuid::new_v4());
        drop(hub);
        assert!(subscription.recv().await.is_none());
    }
}
