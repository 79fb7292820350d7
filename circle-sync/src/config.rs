use std::time::Duration;

/// How the presence tracker receives change notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceFeed {
    /// Per-circle channel; the store decides what the tracker sees.
    Scoped,
    /// Collection-wide channel filtered locally to the circle's members.
    Unscoped,
}

/// Sync layer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Page size requested for every snapshot load
    pub snapshot_limit: usize,
    /// Events buffered while a snapshot is in flight
    pub replay_capacity: usize,
    /// Fetched events queued between a stream and its view
    pub stream_buffer: usize,
    /// First delay before re-listening after a transport drop
    pub reconnect_backoff: Duration,
    /// Reconnect delay ceiling (doubles up to this)
    pub max_reconnect_backoff: Duration,
    /// Delay before re-issuing a snapshot load that failed transiently
    pub reload_retry: Duration,
    pub presence_feed: PresenceFeed,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: 50,
            replay_capacity: 1024,
            stream_buffer: 256,
            reconnect_backoff: Duration::from_millis(250),
            max_reconnect_backoff: Duration::from_secs(5),
            reload_retry: Duration::from_millis(500),
            presence_feed: PresenceFeed::Scoped,
        }
    }
}

impl SyncConfig {
    /// Short delays so tests settle quickly.
    pub fn for_testing() -> Self {
        Self {
            snapshot_limit: 50,
            replay_capacity: 64,
            stream_buffer: 64,
            reconnect_backoff: Duration::from_millis(5),
            max_reconnect_backoff: Duration::from_millis(50),
            reload_retry: Duration::from_millis(10),
            presence_feed: PresenceFeed::Scoped,
        }
    }
}
