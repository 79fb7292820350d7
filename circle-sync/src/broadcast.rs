//! Fan-out of change notifications to every listener of a channel.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each listener gets an independent receiver that buffers up to
//! `capacity` notices; a listener that falls further behind observes
//! `RecvError::Lagged` and must resynchronise.
//!
//! Channels are keyed by `(collection, scope)`. Every collection also has
//! one unscoped channel that sees the notices of all scopes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};

use circle_core::{CircleId, Collection};

use crate::protocol::ChangeNotification;

/// Channel address: a collection, optionally narrowed to one circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub collection: Collection,
    pub scope: Option<CircleId>,
}

impl ChannelKey {
    pub fn scoped(collection: Collection, scope: CircleId) -> Self {
        Self { collection, scope: Some(scope) }
    }

    pub fn unscoped(collection: Collection) -> Self {
        Self { collection, scope: None }
    }
}

/// Statistics for monitoring feed health.
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    pub published: u64,
    pub delivered: u64,
    pub active_channels: usize,
}

/// Lock-free counters updated on the publish path.
struct AtomicFeedStats {
    published: AtomicU64,
    delivered: AtomicU64,
}

/// Per-channel broadcast senders for one store.
pub struct ChangeFeed {
    channels: Arc<RwLock<HashMap<ChannelKey, broadcast::Sender<ChangeNotification>>>>,
    capacity: usize,
    stats: Arc<AtomicFeedStats>,
}

impl ChangeFeed {
    /// `capacity` is how many notices a slow listener may fall behind
    /// before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            stats: Arc::new(AtomicFeedStats {
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a channel, creating it on first use.
    pub async fn listen(&self, key: ChannelKey) -> broadcast::Receiver<ChangeNotification> {
        // Fast path: read lock
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(&key) {
                return sender.subscribe();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver a notice to its scoped channel and the collection-wide one.
    ///
    /// Returns the number of receivers reached. Channels nobody listens on
    /// are not created.
    pub async fn publish(&self, notification: ChangeNotification) -> usize {
        let channels = self.channels.read().await;
        let keys = [
            ChannelKey::scoped(notification.collection, notification.scope_id),
            ChannelKey::unscoped(notification.collection),
        ];

        let delivered: usize = keys
            .iter()
            .filter_map(|key| channels.get(key))
            .map(|sender| sender.send(notification.clone()).unwrap_or(0))
            .sum();

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.stats.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Drop every channel, closing all receivers as a transport loss would.
    pub async fn close_all(&self) -> usize {
        let mut channels = self.channels.write().await;
        let count = channels.len();
        channels.clear();
        count
    }

    /// Number of live receivers on one channel.
    pub async fn listener_count(&self, key: &ChannelKey) -> usize {
        self.channels
            .read()
            .await
            .get(key)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> FeedStats {
        let channels = self.channels.read().await;
        FeedStats {
            published: self.stats.published.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            active_channels: channels.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
