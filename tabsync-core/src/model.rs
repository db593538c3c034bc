//! Replicated data model: peers, chat entries and the shared counter.
//!
//! Every record here travels on the wire inside an [`Envelope`] payload,
//! so field names serialize in camelCase.
//!
//! [`Envelope`]: crate::protocol::Envelope

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, from the local wall clock.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Source of wall-clock timestamps for a session.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The local system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now_millis()
    }
}

/// Fixed color palette handed out to new peers.
pub const PEER_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7",
    "#DDA0DD", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E9",
];

const NAME_ADJECTIVES: [&str; 10] = [
    "Creative", "Smart", "Bright", "Swift", "Bold", "Kind", "Wise", "Cool", "Epic", "Super",
];

const NAME_NOUNS: [&str; 10] = [
    "User", "Coder", "Builder", "Maker", "Thinker", "Dreamer", "Explorer", "Creator", "Artist",
    "Genius",
];

/// `<prefix>_<millis>_<random>`; unique enough to dedup on across tabs.
fn generate_id(prefix: &str, now: Timestamp) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{now}_{}", &random[..9])
}

// ───────────────────────────────────────────────────────────────────
// Peer
// ───────────────────────────────────────────────────────────────────

/// One participating execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: String,
    pub display_name: String,
    pub last_activity_at: Timestamp,
    pub is_composing: bool,
    pub color_tag: String,
}

impl Peer {
    /// Peer record, not composing, last seen at `last_activity_at`.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        color_tag: impl Into<String>,
        last_activity_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_activity_at,
            is_composing: false,
            color_tag: color_tag.into(),
        }
    }

    /// Generate a fresh local identity: random id, random display name
    /// and a color drawn from [`PEER_COLORS`].
    pub fn generate(now: Timestamp) -> Self {
        let mut rng = rand::thread_rng();
        let adjective = NAME_ADJECTIVES.choose(&mut rng).copied().unwrap_or("Swift");
        let noun = NAME_NOUNS.choose(&mut rng).copied().unwrap_or("User");
        let suffix: u32 = rng.gen_range(0..1000);
        let color = PEER_COLORS.choose(&mut rng).copied().unwrap_or(PEER_COLORS[0]);

        Self::new(
            generate_id("peer", now),
            format!("{adjective}{noun}{suffix}"),
            color,
            now,
        )
    }
}

// ───────────────────────────────────────────────────────────────────
// ChatEntry
// ───────────────────────────────────────────────────────────────────

/// A chat message. Immutable after creation; only deletion changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    pub color_tag: String,
}

impl ChatEntry {
    /// Build an entry authored now. `expires_in_minutes` of zero means
    /// permanent, same as `None`.
    pub fn compose(
        body: &str,
        author_id: &str,
        author_name: &str,
        color_tag: &str,
        expires_in_minutes: Option<u32>,
        now: Timestamp,
    ) -> Self {
        let expires_at = expires_in_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| now + u64::from(minutes) * 60_000);

        Self {
            id: generate_id("msg", now),
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            body: body.trim().to_string(),
            created_at: now,
            expires_at,
            color_tag: color_tag.to_string(),
        }
    }

    /// Whether the entry has an expiry at or before `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ───────────────────────────────────────────────────────────────────
// Counter
// ───────────────────────────────────────────────────────────────────

/// The shared counter register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub value: i64,
    pub last_writer_name: String,
    pub last_writer_at: Timestamp,
}
