//! Chat log replica.
//!
//! An id-keyed set union kept in receipt order. Deletion removes the entry
//! and remembers its id in a bounded tombstone cache, so a stale
//! re-delivery of the same `message` envelope cannot bring it back.
//! Receipt order is local: two tabs may list near-simultaneous messages
//! differently.

use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::model::{now_millis, ChatEntry, Timestamp};

/// Default number of deleted ids remembered.
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 1024;

pub struct MessageStore {
    entries: Vec<ChatEntry>,
    ids: HashSet<String>,
    tombstones: LruCache<String, ()>,
}

impl MessageStore {
    /// Empty log with the default tombstone capacity.
    pub fn new() -> Self {
        Self::with_tombstone_capacity(DEFAULT_TOMBSTONE_CAPACITY)
    }

    /// Empty log remembering up to `capacity` removed ids.
    pub fn with_tombstone_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            tombstones: LruCache::new(capacity),
        }
    }

    /// Compose and store a local message. `None` when the body is blank.
    pub fn send(
        &mut self,
        body: &str,
        author_id: &str,
        author_name: &str,
        color_tag: &str,
        expires_in_minutes: Option<u32>,
    ) -> Option<ChatEntry> {
        self.send_at(body, author_id, author_name, color_tag, expires_in_minutes, now_millis())
    }

    /// [`send`](Self::send) with an explicit creation time.
    pub fn send_at(
        &mut self,
        body: &str,
        author_id: &str,
        author_name: &str,
        color_tag: &str,
        expires_in_minutes: Option<u32>,
        now: Timestamp,
    ) -> Option<ChatEntry> {
        if body.trim().is_empty() {
            return None;
        }

        let entry = ChatEntry::compose(body, author_id, author_name, color_tag, expires_in_minutes, now);
        self.add(entry.clone());
        Some(entry)
    }

    /// Insert unless the id is already present or was deleted.
    pub fn add(&mut self, entry: ChatEntry) -> bool {
        if self.ids.contains(&entry.id) || self.tombstones.contains(entry.id.as_str()) {
            return false;
        }
        self.ids.insert(entry.id.clone());
        self.entries.push(entry);
        true
    }

    /// Remove by id, no ownership check. The id is tombstoned even when
    /// the entry has not arrived yet. Returns whether an entry was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.tombstones.put(id.to_string(), ());
        if !self.ids.remove(id) {
            return false;
        }
        self.entries.retain(|e| e.id != id);
        true
    }

    /// Remove entries whose expiry has passed.
    pub fn sweep_expired(&mut self) -> Vec<String> {
        self.sweep_expired_at(now_millis())
    }

    /// [`sweep_expired`](Self::sweep_expired) evaluated at `now`.
    pub fn sweep_expired_at(&mut self, now: Timestamp) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.id.clone())
            .collect();

        for id in &expired {
            self.remove(id);
        }

        expired
    }

    /// Entries in receipt order.
    pub fn list(&self) -> Vec<ChatEntry> {
        self.entries.clone()
    }

    /// Look up a message by id.
    pub fn get(&self, id: &str) -> Option<&ChatEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Number of messages held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("entries", &self.entries.len())
            .field("tombstones", &self.tombstones.len())
            .finish()
    }
}
