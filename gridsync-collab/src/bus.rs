//! In-process broadcast substrate.
//!
//! Uses tokio broadcast channels for O(1) fan-out to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` notifications. The bus pre-filters by [`NotificationKind`]
//! only; document-identity filtering is the subscriber's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::{Notification, NotificationKind};

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Notifications buffered per subscriber before lagging ones drop.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Statistics for monitoring bus health.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub notifications_published: u64,
    pub notifications_lagged: u64,
}

/// Atomic bus stats so publish never acquires a lock.
struct AtomicBusStats {
    published: AtomicU64,
    lagged: AtomicU64,
}

impl AtomicBusStats {
    fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            lagged: AtomicU64::new(0),
        }
    }
}

/// The in-process publish/subscribe bus.
///
/// All sessions of a process share one bus; every subscriber of a kind
/// observes every notification of that kind, in publish order.
pub struct MessageBus {
    sender: broadcast::Sender<Notification>,
    capacity: usize,
    stats: Arc<AtomicBusStats>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity);
        Self {
            sender,
            capacity: config.capacity,
            stats: Arc::new(AtomicBusStats::new()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    /// Subscribe to all notifications of one kind.
    pub fn subscribe(&self, kind: NotificationKind) -> BusSubscription {
        BusSubscription {
            kind,
            receiver: self.sender.subscribe(),
            stats: self.stats.clone(),
        }
    }

    /// Publish a notification to every subscriber.
    ///
    /// Returns the number of receivers it reached. A bus with no
    /// subscribers swallows the notification, as a broadcast should.
    pub fn notify(&self, notification: Notification) -> usize {
        let count = self.sender.send(notification).unwrap_or(0);
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> BusStats {
        BusStats {
            notifications_published: self.stats.published.load(Ordering::Relaxed),
            notifications_lagged: self.stats.lagged.load(Ordering::Relaxed),
        }
    }
}

/// A per-subscriber receiver yielding only notifications of one kind.
pub struct BusSubscription {
    kind: NotificationKind,
    receiver: broadcast::Receiver<Notification>,
    stats: Arc<AtomicBusStats>,
}

impl BusSubscription {
    /// Next notification of the subscribed kind.
    ///
    /// Returns `None` once the bus is gone. A lagged receiver logs a
    /// warning and resumes with the oldest retained notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(n) if n.kind() == self.kind => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                    log::warn!("bus subscriber lagged, skipped {skipped} notifications");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }
}
