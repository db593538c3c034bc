//! Presence replica: who is here, and are they still alive.
//!
//! A liveness-timeout set. Peers enter on `peer-join`, refresh on
//! `peer-update` and `typing`, and leave either explicitly (`peer-leave`)
//! or by going quiet for longer than the inactivity timeout.
//!
//! ```text
//! peer-join ──► join()      ─┐
//! peer-update ► update()     ├──► HashMap<id, Peer> ──► list()
//! typing ─────► set_composing()
//! peer-leave ─► leave()      │
//! maintenance ► sweep_inactive()
//! ```
//!
//! Updates never create records. A late `peer-update` from a tab that
//! already left must not bring it back.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::{now_millis, Peer, Timestamp};

/// Default inactivity timeout (5 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Known peers, keyed by id.
#[derive(Debug, Default)]
pub struct PresenceStore {
    peers: HashMap<String, Peer>,
}

impl PresenceStore {
    /// Create an empty peer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a peer, stamped with the local observation time.
    pub fn join(&mut self, peer: Peer) {
        self.join_at(peer, now_millis());
    }

    /// [`join`](Self::join) with an explicit observation time.
    pub fn join_at(&mut self, mut peer: Peer, observed_at: Timestamp) {
        peer.last_activity_at = observed_at;
        self.peers.insert(peer.id.clone(), peer);
    }

    /// Remove a peer. Returns whether it was known.
    pub fn leave(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// Merge `peer` into the existing record. Unknown ids are dropped.
    /// Returns whether a record changed.
    pub fn update(&mut self, peer: Peer) -> bool {
        let Some(existing) = self.peers.get_mut(&peer.id) else {
            return false;
        };

        let last_activity_at = existing.last_activity_at.max(peer.last_activity_at);
        *existing = Peer {
            last_activity_at,
            ..peer
        };
        true
    }

    /// Record activity for a known peer. Never moves time backwards.
    pub fn touch(&mut self, peer_id: &str, at: Timestamp) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.last_activity_at = peer.last_activity_at.max(at);
                true
            }
            None => false,
        }
    }

    /// Set the composing flag of a known peer.
    pub fn set_composing(&mut self, peer_id: &str, is_composing: bool) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.is_composing = is_composing;
                true
            }
            None => false,
        }
    }

    /// Remove every peer idle for longer than `timeout`.
    pub fn sweep_inactive(&mut self, timeout: Duration) -> Vec<String> {
        self.sweep_inactive_at(timeout, now_millis())
    }

    /// [`sweep_inactive`](Self::sweep_inactive) evaluated at `now`.
    pub fn sweep_inactive_at(&mut self, timeout: Duration, now: Timestamp) -> Vec<String> {
        let cutoff = now.saturating_sub(timeout.as_millis() as Timestamp);
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.last_activity_at < cutoff)
            .map(|p| p.id.clone())
            .collect();

        for id in &stale {
            self.peers.remove(id);
        }

        stale
    }

    /// All known peers, in no particular order.
    pub fn list(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    /// Look up a peer by id.
    pub fn get(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Whether `peer_id` is currently present.
    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Number of present peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are present.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
