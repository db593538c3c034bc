//! # tabsync-core: Peer-to-peer state sync between browsing contexts
//!
//! Several tabs of one dashboard share a peer list, a chat log and a
//! counter without a server. Every tab keeps a full replica and
//! broadcasts its own mutations; every tab applies the others'.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON envelopes   ┌─────────────┐
//! │  Session A  │ ◄────────────────► │  Session B  │
//! │  (per tab)  │   named channel    │  (per tab)  │
//! └──────┬──────┘                    └──────┬──────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐
//! │ EventRouter │                    │ EventRouter │
//! └──────┬──────┘                    └──────┬──────┘
//!        ▼                                  ▼
//! presence / messages / counter     presence / messages / counter
//!
//!              ┌──────────────────────────┐
//!              │ ChannelHub               │
//!              │  BroadcastGroup per name │
//!              │  (fan-out, no echo)      │
//!              └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Peer, chat entry and counter records
//! - [`protocol`]: `{kind, payload}` JSON envelopes
//! - [`hub`]: In-process named broadcast channels
//! - [`transport`]: Fire-and-forget publish/subscribe
//! - [`presence`]: Liveness-timeout peer set
//! - [`messages`]: Chat log with expiry and tombstones
//! - [`counter`]: Last-writer-wins counter register
//! - [`router`]: Inbound envelope dispatch
//! - [`session`]: Per-tab coordinator, timers and lifecycle
//! - [`config`]: JSON configuration
//!
//! ## Convergence
//!
//! | Replica  | Rule                                   |
//! |----------|----------------------------------------|
//! | presence | join/leave/update, swept after silence |
//! | messages | set union by id, deletes tombstoned    |
//! | counter  | last writer wins on `last_writer_at`   |

pub mod config;
pub mod counter;
pub mod hub;
pub mod messages;
pub mod model;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{load_config, AppConfig, ConfigError, SessionConfig};
pub use counter::CounterStore;
pub use hub::{BroadcastGroup, ChannelHub, ChannelStats, HubConfig};
pub use messages::MessageStore;
pub use model::{ChatEntry, Counter, Peer, Timestamp};
pub use presence::PresenceStore;
pub use protocol::{CounterUpdate, Envelope, EnvelopeKind, PeerRef, ProtocolError, TypingSignal};
pub use router::{Dispatch, EventRouter, Replicas, StoreTarget};
pub use session::{Session, SessionEvent, SessionPhase};
pub use transport::{BroadcastTransport, Subscription, Transport};
