//! Inbound envelope dispatch.
//!
//! Every kind belongs to exactly one replica:
//!
//! | kind                                      | replica  |
//! |-------------------------------------------|----------|
//! | peer-join, peer-leave, peer-update, typing | presence |
//! | message, delete-message                   | messages |
//! | counter-update, counter-reset             | counter  |
//!
//! Frames that fail to decode are logged and dropped. A tab running a
//! newer or older build must never take the others down.

use crate::counter::CounterStore;
use crate::messages::MessageStore;
use crate::model::{now_millis, Timestamp};
use crate::presence::PresenceStore;
use crate::protocol::{Envelope, EnvelopeKind};

/// The replica an envelope kind is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTarget {
    Presence,
    Messages,
    Counter,
}

impl EnvelopeKind {
    /// Routing table.
    pub fn target(&self) -> StoreTarget {
        match self {
            Self::PeerJoin | Self::PeerLeave | Self::PeerUpdate | Self::Typing => {
                StoreTarget::Presence
            }
            Self::Message | Self::DeleteMessage => StoreTarget::Messages,
            Self::CounterUpdate | Self::CounterReset => StoreTarget::Counter,
        }
    }
}

/// The three local replicas of one session.
#[derive(Debug, Default)]
pub struct Replicas {
    pub presence: PresenceStore,
    pub messages: MessageStore,
    pub counter: CounterStore,
    /// Our own peer id; presence envelopes about it are ignored.
    pub local_id: Option<String>,
}

impl Replicas {
    /// Empty replicas remembering up to `tombstone_capacity` deleted ids.
    pub fn new(tombstone_capacity: usize) -> Self {
        Self {
            presence: PresenceStore::new(),
            messages: MessageStore::with_tombstone_capacity(tombstone_capacity),
            counter: CounterStore::new(),
            local_id: None,
        }
    }

    fn is_local(&self, peer_id: &str) -> bool {
        self.local_id.as_deref() == Some(peer_id)
    }
}

/// Outcome of routing one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub kind: EnvelopeKind,
    pub target: StoreTarget,
    /// Whether the target replica changed.
    pub changed: bool,
    /// Set when a `peer-join` introduced a peer we did not know.
    pub new_peer: Option<String>,
}

/// Stateless router from envelopes to replicas.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter;

impl EventRouter {
    /// Create a router.
    pub fn new() -> Self {
        Self
    }

    /// Decode a raw frame and dispatch it. Malformed frames yield `None`.
    pub fn dispatch_frame(&self, bytes: &[u8], replicas: &mut Replicas) -> Option<Dispatch> {
        self.dispatch_frame_at(bytes, replicas, now_millis())
    }

    /// [`dispatch_frame`](Self::dispatch_frame) observed at `now`.
    pub fn dispatch_frame_at(&self, bytes: &[u8], replicas: &mut Replicas, now: Timestamp) -> Option<Dispatch> {
        match Envelope::decode(bytes) {
            Ok(envelope) => Some(self.dispatch_at(envelope, replicas, now)),
            Err(e) => {
                log::debug!("Dropping malformed envelope: {e}");
                None
            }
        }
    }

    /// Dispatch a decoded envelope, observed now.
    pub fn dispatch(&self, envelope: Envelope, replicas: &mut Replicas) -> Dispatch {
        self.dispatch_at(envelope, replicas, now_millis())
    }

    /// Dispatch with an explicit local observation time.
    pub fn dispatch_at(&self, envelope: Envelope, replicas: &mut Replicas, now: Timestamp) -> Dispatch {
        let kind = envelope.kind();
        log::trace!("Dispatching {kind} to {:?}", kind.target());
        let mut new_peer = None;

        let changed = match envelope {
            Envelope::PeerJoin(peer) => {
                if replicas.is_local(&peer.id) {
                    false
                } else {
                    if !replicas.presence.contains(&peer.id) {
                        new_peer = Some(peer.id.clone());
                    }
                    replicas.presence.join_at(peer, now);
                    true
                }
            }
            Envelope::PeerLeave(peer_ref) => {
                !replicas.is_local(&peer_ref.id) && replicas.presence.leave(&peer_ref.id)
            }
            Envelope::PeerUpdate(peer) => {
                !replicas.is_local(&peer.id) && replicas.presence.update(peer)
            }
            Envelope::Typing(signal) => {
                if replicas.is_local(&signal.peer_id) {
                    false
                } else {
                    let known = replicas.presence.set_composing(&signal.peer_id, signal.is_composing);
                    if known {
                        replicas.presence.touch(&signal.peer_id, now);
                    }
                    known
                }
            }
            Envelope::Message(entry) => replicas.messages.add(entry),
            Envelope::DeleteMessage(id) => replicas.messages.remove(&id),
            Envelope::CounterUpdate(update) => replicas.counter.merge_remote(update.counter()),
            Envelope::CounterReset => {
                replicas.counter.reset_at(now);
                true
            }
        };

        Dispatch {
            kind,
            target: kind.target(),
            changed,
            new_peer,
        }
    }
}
