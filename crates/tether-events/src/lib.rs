//! Typed event bus, periodic scheduling, and the delivery pulse for Tether.
//!
//! Three small pieces the session layer is built on:
//!
//! - [`EventBus`]: typed publish/subscribe over a Tokio broadcast channel.
//! - [`Scheduler`]: periodic jobs with [`TaskHandle`]s for live
//!   rescheduling and deterministic cancellation.
//! - [`Pulse`]: a shared "flush now" signal that waiters join lazily.
//!
//! # Integration
//!
//! ```ignore
//! let bus = EventBus::<SessionEvent>::new(256);
//! let mut rx = bus.subscribe();
//! let task = Scheduler::every("broadcast", Duration::from_secs(30), move || {
//!     let registry = Arc::clone(&registry);
//!     async move { registry.lock().await.broadcast_status(); }
//! });
//! // later, on config reload:
//! task.set_period(Duration::from_secs(10));
//! ```

mod pulse;
mod scheduler;

pub use pulse::{Pulse, PulseSubscription};
pub use scheduler::{MIN_PERIOD, Scheduler, TaskHandle};

use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Typed publish/subscribe.
///
/// Every subscriber sees every event published after it subscribed, in
/// publish order. A subscriber that falls more than `capacity` events
/// behind skips the oldest ones (`RecvError::Lagged`) instead of slowing
/// the publisher down: publishing never blocks and never fails.
#[derive(Debug)]
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Returns how many subscribers it reached
    /// (zero is fine: nobody was listening).
    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_reaches_nobody() {
        let bus = EventBus::<u32>::new(4);
        assert_eq!(bus.publish(1), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish("a"), 1);
        bus.publish("b");
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let bus = EventBus::new(8);
        let clone = bus.clone();
        let mut rx = bus.subscribe();
        clone.publish(7u8);
        assert_eq!(rx.recv().await.unwrap(), 7);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..4u32 {
            bus.publish(i);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
