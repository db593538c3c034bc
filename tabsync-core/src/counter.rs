//! Shared counter replica: a last-writer-wins register.
//!
//! Local mutations are relative deltas; what travels is the absolute
//! snapshot. Remote snapshots replace local state when their
//! `last_writer_at` is not older than ours. Ties go to the incoming value.
//!
//! Concurrent deltas are not added together. If A and B both increment
//! from 4 at nearly the same time, the later-stamped snapshot (5) wins
//! everywhere, not 6.

use crate::model::{now_millis, Counter, Timestamp};
use crate::protocol::CounterUpdate;

#[derive(Debug, Default)]
pub struct CounterStore {
    state: Counter,
}

impl CounterStore {
    /// Register holding the zero counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a local delta and return the snapshot to broadcast.
    pub fn apply_delta(&mut self, delta: i64, writer_id: &str, writer_name: &str) -> CounterUpdate {
        self.apply_delta_at(delta, writer_id, writer_name, now_millis())
    }

    /// [`apply_delta`](Self::apply_delta) stamped at `now`.
    ///
    /// The stamp never goes below the held one, so a write made on top of
    /// a snapshot from a peer with a faster clock is not rejected as stale.
    pub fn apply_delta_at(
        &mut self,
        delta: i64,
        writer_id: &str,
        writer_name: &str,
        now: Timestamp,
    ) -> CounterUpdate {
        self.state = Counter {
            value: self.state.value.saturating_add(delta),
            last_writer_name: writer_name.to_string(),
            last_writer_at: now.max(self.state.last_writer_at),
        };
        CounterUpdate::from_counter(&self.state, writer_id)
    }

    /// Adopt a remote snapshot if it is at least as fresh as ours.
    pub fn merge_remote(&mut self, snapshot: Counter) -> bool {
        if snapshot.last_writer_at < self.state.last_writer_at {
            log::trace!(
                "Rejecting stale counter snapshot ({} < {})",
                snapshot.last_writer_at,
                self.state.last_writer_at
            );
            return false;
        }
        self.state = snapshot;
        true
    }

    /// Zero the value, keeping the last writer's name.
    pub fn reset(&mut self) -> Counter {
        self.reset_at(now_millis())
    }

    /// [`reset`](Self::reset) stamped at `now`.
    pub fn reset_at(&mut self, now: Timestamp) -> Counter {
        self.state = Counter {
            value: 0,
            last_writer_name: std::mem::take(&mut self.state.last_writer_name),
            last_writer_at: now.max(self.state.last_writer_at),
        };
        self.state.clone()
    }

    /// Copy of the current value and its last writer.
    pub fn snapshot(&self) -> Counter {
        self.state.clone()
    }

    /// Whether anyone ever wrote to this counter.
    pub fn is_pristine(&self) -> bool {
        self.state.last_writer_at == 0
    }
}
