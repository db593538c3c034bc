//! Transport seam between a session and its broadcast primitive.
//!
//! Contract:
//! - `publish` is fire-and-forget. No confirmation, and it never fails
//!   towards the caller. A closed transport swallows the call, since
//!   teardown publishes `peer-leave` after things start shutting down.
//! - `subscribe` hands out a [`Subscription`] yielding every frame from
//!   other contexts, once, in arrival order.
//! - `close` stops deliveries and is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::hub::{AtomicChannelStats, BroadcastGroup, Frame};
use crate::protocol::Envelope;

/// A broadcast primitive shared by independent contexts.
pub trait Transport: Send + Sync {
    /// Publish an envelope to every other context.
    fn publish(&self, envelope: &Envelope);

    /// Start receiving frames. `None` once the transport is closed.
    fn subscribe(&self) -> Option<Subscription>;

    /// Release the channel. Safe to call more than once.
    fn close(&self);

    /// Whether publishes currently reach the channel.
    fn is_available(&self) -> bool;
}

/// Hub-backed transport endpoint for one context.
pub struct BroadcastTransport {
    id: Uuid,
    group: Arc<BroadcastGroup>,
    stats: Arc<AtomicChannelStats>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl BroadcastTransport {
    pub(crate) fn new(group: Arc<BroadcastGroup>) -> Self {
        let stats = group.atomic_stats();
        stats.transport_opened();
        let (closed_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            group,
            stats,
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Identity used to filter out our own frames.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }

    /// Name of the channel this transport publishes on.
    pub fn channel_name(&self) -> &str {
        self.group.name()
    }

    /// Publish pre-encoded bytes. Lets callers (and tests) put frames on
    /// the wire that no [`Envelope`] would produce.
    pub fn publish_raw(&self, bytes: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) {
            log::trace!("Dropping publish on closed transport {}", self.id);
            return;
        }
        self.group.send(Frame {
            origin: self.id,
            bytes: Arc::new(bytes),
        });
    }
}

impl Transport for BroadcastTransport {
    fn publish(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(bytes) => self.publish_raw(bytes),
            Err(e) => log::warn!("Failed to encode {} envelope: {e}", envelope.kind()),
        }
    }

    fn subscribe(&self) -> Option<Subscription> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(Subscription {
            origin: self.id,
            rx: self.group.subscribe(),
            closed: self.closed_tx.subscribe(),
            stats: self.stats.clone(),
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stats.transport_closed();
        let _ = self.closed_tx.send(true);
        log::debug!("Transport {} closed on '{}'", self.id, self.group.name());
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiving side of a transport.
pub struct Subscription {
    origin: Uuid,
    rx: broadcast::Receiver<Frame>,
    closed: watch::Receiver<bool>,
    stats: Arc<AtomicChannelStats>,
}

impl Subscription {
    /// Wait for the next frame from another context. `None` once the
    /// owning transport is closed or the channel is gone.
    pub async fn recv(&mut self) -> Option<Arc<Vec<u8>>> {
        loop {
            if *self.closed.borrow() {
                return None;
            }

            let received = tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        // Transport dropped.
                        return None;
                    }
                    continue;
                }
                received = self.rx.recv() => received,
            };

            match received {
                Ok(frame) if frame.origin == self.origin => continue,
                Ok(frame) => return Some(frame.bytes),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Subscription lagged, {missed} frames lost");
                    self.stats.record_dropped(missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing
    /// is pending or the transport is closed.
    pub fn try_recv(&mut self) -> Option<Arc<Vec<u8>>> {
        loop {
            if *self.closed.borrow() {
                return None;
            }
            match self.rx.try_recv() {
                Ok(frame) if frame.origin == self.origin => continue,
                Ok(frame) => return Some(frame.bytes),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    log::warn!("Subscription lagged, {missed} frames lost");
                    self.stats.record_dropped(missed);
                }
                Err(_) => return None,
            }
        }
    }
}
