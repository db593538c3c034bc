//! In-process named broadcast channels.
//!
//! Stands in for the browser's `BroadcastChannel`: every context that opens
//! the same channel name receives every frame published by every *other*
//! context on that name. Each receiver buffers up to `capacity` frames; a
//! receiver that falls further behind loses the oldest ones.
//!
//! ```text
//! ChannelHub
//!   ├── "collaborative-dashboard" ── BroadcastGroup ──┬── tab A
//!   │                                                 ├── tab B
//!   │                                                 └── tab C
//!   └── "other-channel"           ── BroadcastGroup ──── tab D
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::transport::BroadcastTransport;

/// One encoded envelope in flight, tagged with the transport that sent it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub origin: Uuid,
    pub bytes: Arc<Vec<u8>>,
}

/// Hub configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Frames buffered per receiver before the oldest are dropped
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub open_transports: usize,
}

/// Atomic counters, updated without locking on the publish path.
#[derive(Default)]
pub(crate) struct AtomicChannelStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    open_transports: AtomicUsize,
}

impl AtomicChannelStats {
    pub(crate) fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn transport_opened(&self) {
        self.open_transports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transport_closed(&self) {
        self.open_transports.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A single named channel shared by every context that opened it.
pub struct BroadcastGroup {
    name: String,
    sender: broadcast::Sender<Frame>,
    capacity: usize,
    stats: Arc<AtomicChannelStats>,
}

impl BroadcastGroup {
    fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            capacity,
            stats: Arc::new(AtomicChannelStats::default()),
        }
    }

    /// Get the channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Send a frame to every receiver. Returns how many receivers got it;
    /// zero when nobody is listening, which is not an error.
    pub(crate) fn send(&self, frame: Frame) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.stats.record_sent();
        count
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    pub(crate) fn atomic_stats(&self) -> Arc<AtomicChannelStats> {
        self.stats.clone()
    }

    /// Snapshot of the channel counters.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            open_transports: self.stats.open_transports.load(Ordering::Relaxed),
        }
    }
}

/// Registry of named channels. Cheap to clone; clones share channels.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    config: HubConfig,
}

impl ChannelHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Hub whose channels buffer `capacity` frames per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(HubConfig { capacity })
    }

    /// Get or create the group for `name`.
    pub fn group(&self, name: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(group) = channels.get(name) {
                return group.clone();
            }
        }

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        self.entry(&mut channels, name)
    }

    /// Open a new transport endpoint on the named channel.
    ///
    /// The transport is counted as open before the map lock is released,
    /// so [`remove_idle`](Self::remove_idle) cannot orphan it.
    pub fn open(&self, name: &str) -> BroadcastTransport {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let group = self.entry(&mut channels, name);
        BroadcastTransport::new(group)
    }

    fn entry(
        &self,
        channels: &mut HashMap<String, Arc<BroadcastGroup>>,
        name: &str,
    ) -> Arc<BroadcastGroup> {
        channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(name, self.config.capacity)))
            .clone()
    }

    /// Stats for a channel, if it was ever opened.
    pub fn stats(&self, name: &str) -> Option<ChannelStats> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(name).map(|group| group.stats())
    }

    /// Number of channels currently registered.
    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop channels nobody has open any more.
    pub fn remove_idle(&self) -> usize {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let before = channels.len();
        channels.retain(|_, group| group.stats().open_transports > 0);
        before - channels.len()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn test_group_get_or_create() {
        let hub = ChannelHub::with_capacity(16);

        let g1 = hub.group("room");
        let g2 = hub.group("room");

        assert!(Arc::ptr_eq(&g1, &g2));
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(g1.capacity(), 16);
        assert_eq!(g1.name(), "room");
    }

    #[test]
    fn test_channels_are_isolated() {
        let hub = ChannelHub::default();
        let a = hub.group("a");
        let b = hub.group("b");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(hub.channel_count(), 2);
    }

    #[test]
    fn test_send_counts_receivers() {
        let hub = ChannelHub::with_capacity(8);
        let group = hub.group("room");
        let _rx1 = group.subscribe();
        let _rx2 = group.subscribe();

        let frame = Frame {
            origin: Uuid::new_v4(),
            bytes: Arc::new(vec![1, 2, 3]),
        };
        assert_eq!(group.send(frame), 2);
        assert_eq!(group.stats().frames_sent, 1);
    }

    #[test]
    fn test_send_without_receivers_is_not_an_error() {
        let hub = ChannelHub::default();
        let group = hub.group("room");
        let frame = Frame {
            origin: Uuid::new_v4(),
            bytes: Arc::new(Vec::new()),
        };
        assert_eq!(group.send(frame), 0);
    }

    #[test]
    fn test_open_tracks_transports() {
        let hub = ChannelHub::default();
        let t1 = hub.open("room");
        let _t2 = hub.open("room");
        assert_eq!(hub.stats("room").unwrap().open_transports, 2);

        t1.close();
        assert_eq!(hub.stats("room").unwrap().open_transports, 1);
        assert!(hub.stats("missing").is_none());
    }

    #[test]
    fn test_remove_idle_channels() {
        let hub = ChannelHub::default();
        let t1 = hub.open("busy");
        let t2 = hub.open("idle");
        t2.close();

        assert_eq!(hub.remove_idle(), 1);
        assert_eq!(hub.channel_count(), 1);
        assert!(hub.stats("busy").is_some());
        drop(t1);
    }

    #[test]
    fn test_open_survives_concurrent_remove_idle() {
        let hub = ChannelHub::default();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    hub.remove_idle();
                }
            });
            scope.spawn(|| {
                for _ in 0..2_000 {
                    let transport = hub.open("room");
                    // An open transport's channel is always the registered one.
                    assert!(Arc::ptr_eq(transport.group(), &hub.group("room")));
                }
            });
        });
    }

    #[test]
    fn test_reopen_after_remove_idle_shares_channel() {
        let hub = ChannelHub::default();
        drop(hub.open("room"));
        assert_eq!(hub.remove_idle(), 1);

        let a = hub.open("room");
        let b = hub.open("room");
        let mut sub_b = b.subscribe().unwrap();
        a.publish_raw(b"hello".to_vec());
        assert_eq!(sub_b.try_recv().unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_hub_config_defaults_from_empty_json() {
        let config: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.capacity, 256);
    }
}
