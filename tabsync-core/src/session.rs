//! Session coordinator: one per tab.
//!
//! Owns the local identity, the three replicas and the transport, and
//! runs the background work:
//!
//! ```text
//!              ┌──────────── Session ─────────────┐
//! UI call ───► │ entry point ──► Replicas ──► publish ──► Transport
//!              │                   ▲                               │
//!              │ inbound pump ─────┘ (EventRouter)  ◄── frames ────┘
//!              │ heartbeat timer   (peer-update every 30s)         │
//!              │ maintenance timer (expiry + inactivity every 60s) │
//!              │ typing timer      (one-shot, re-armed)            │
//!              └───────────────────────────────────────────────────┘
//! ```
//!
//! Everything that touches the replicas holds the same lock, so entry
//! points, timer callbacks and inbound frames never interleave. Entry
//! points apply locally before publishing and never wait on peers. The
//! change is visible as soon as the call returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::hub::ChannelHub;
use crate::model::{ChatEntry, Clock, Counter, Peer, SystemClock, Timestamp};
use crate::protocol::{CounterUpdate, Envelope};
use crate::router::{EventRouter, Replicas, StoreTarget};
use crate::transport::{Subscription, Transport};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No identity yet; all entry points are no-ops.
    Uninitialized,
    Announcing,
    Active,
    Closing,
    Closed,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    PeersChanged,
    MessagesChanged,
    CounterChanged(Counter),
}

struct SessionState {
    phase: SessionPhase,
    local: Option<Peer>,
    replicas: Replicas,
    /// Bumped on every typing signal; a timer only fires for its own.
    typing_generation: u64,
}

impl SessionState {
    /// Local identity, if mutations are currently allowed.
    fn active_local(&self) -> Option<Peer> {
        match self.phase {
            SessionPhase::Active => self.local.clone(),
            _ => None,
        }
    }

    /// The live presence record for ourselves.
    fn local_record(&self) -> Option<Peer> {
        let local = self.local.as_ref()?;
        Some(
            self.replicas
                .presence
                .get(&local.id)
                .cloned()
                .unwrap_or_else(|| local.clone()),
        )
    }
}

/// Tasks owned by a session. Lives outside the replica lock so teardown
/// never waits on a task that holds it.
#[derive(Default)]
struct TaskHandles {
    background: Vec<AbortHandle>,
    typing: Option<AbortHandle>,
}

struct Shared {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    router: EventRouter,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    event_tx: mpsc::Sender<SessionEvent>,
    /// Set once we announced ourselves.
    local_id: OnceLock<String>,
    tasks: std::sync::Mutex<TaskHandles>,
    closed: AtomicBool,
}

impl Shared {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn task_handles(&self) -> std::sync::MutexGuard<'_, TaskHandles> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the replicas, requiring an open session and an available
    /// transport for mutations.
    async fn lock_for_mutation(&self) -> Option<(MutexGuard<'_, SessionState>, Peer)> {
        if self.is_closed() || !self.transport.is_available() {
            return None;
        }
        let state = self.state.lock().await;
        if self.is_closed() {
            return None;
        }
        let local = state.active_local()?;
        Some((state, local))
    }

    async fn phase(&self) -> SessionPhase {
        let phase = self.state.lock().await.phase;
        if self.is_closed() {
            SessionPhase::Closed
        } else {
            phase
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            log::trace!("Observer event dropped: {e}");
        }
    }

    fn emit_for(&self, target: StoreTarget, state: &SessionState) {
        let event = match target {
            StoreTarget::Presence => SessionEvent::PeersChanged,
            StoreTarget::Messages => SessionEvent::MessagesChanged,
            StoreTarget::Counter => SessionEvent::CounterChanged(state.replicas.counter.snapshot()),
        };
        self.emit(event);
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        let mut state = self.state.lock().await;
        if state.phase != SessionPhase::Active || self.is_closed() {
            return;
        }

        let now = self.now();
        let Some(dispatch) = self.router.dispatch_frame_at(bytes, &mut state.replicas, now) else {
            return;
        };

        if let Some(peer_id) = &dispatch.new_peer {
            self.greet(&state, peer_id);
        }
        if dispatch.changed {
            self.emit_for(dispatch.target, &state);
        }
    }

    /// A tab we did not know joined: re-announce ourselves and share the
    /// counter so it does not start from zero.
    fn greet(&self, state: &SessionState, peer_id: &str) {
        let Some(record) = state.local_record() else {
            return;
        };
        log::debug!("Greeting new peer {peer_id}");
        self.transport.publish(&Envelope::PeerJoin(record.clone()));

        if !state.replicas.counter.is_pristine() {
            let update = CounterUpdate::from_counter(&state.replicas.counter.snapshot(), record.id);
            self.transport.publish(&Envelope::CounterUpdate(update));
        }
    }

    async fn heartbeat(&self) {
        let Some((mut state, local)) = self.lock_for_mutation().await else {
            return;
        };
        let now = self.now();
        state.replicas.presence.touch(&local.id, now);
        if let Some(record) = state.local_record() {
            self.transport.publish(&Envelope::PeerUpdate(record));
        }
    }

    async fn maintenance(&self) {
        let mut state = self.state.lock().await;
        if state.phase != SessionPhase::Active || self.is_closed() {
            return;
        }

        let now = self.now();
        if let Some(local_id) = state.local.as_ref().map(|p| p.id.clone()) {
            state.replicas.presence.touch(&local_id, now);
        }

        let expired = state.replicas.messages.sweep_expired_at(now);
        let inactive = state
            .replicas
            .presence
            .sweep_inactive_at(self.config.inactivity_timeout(), now);

        if !expired.is_empty() {
            log::debug!("Swept {} expired messages", expired.len());
            self.emit(SessionEvent::MessagesChanged);
        }
        if !inactive.is_empty() {
            log::debug!("Swept {} inactive peers: {inactive:?}", inactive.len());
            self.emit(SessionEvent::PeersChanged);
        }
    }

    async fn set_typing(self: &Arc<Self>, is_composing: bool) {
        let Some((mut state, local)) = self.lock_for_mutation().await else {
            return;
        };

        state.typing_generation += 1;
        if let Some(timer) = self.task_handles().typing.take() {
            timer.abort();
        }

        state.replicas.presence.set_composing(&local.id, is_composing);
        if is_composing {
            let now = self.now();
            state.replicas.presence.touch(&local.id, now);
        }
        self.transport.publish(&Envelope::typing(&local, is_composing));

        if is_composing {
            let generation = state.typing_generation;
            let shared = Arc::clone(self);
            let timeout = self.config.typing_timeout();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.expire_typing(generation).await;
            });
            self.task_handles().typing = Some(timer.abort_handle());
        }

        self.emit(SessionEvent::PeersChanged);
    }

    async fn expire_typing(&self, generation: u64) {
        let Some((mut state, local)) = self.lock_for_mutation().await else {
            return;
        };
        if state.typing_generation != generation {
            return;
        }

        // This task is the timer; forget the handle without aborting it.
        self.task_handles().typing = None;
        state.replicas.presence.set_composing(&local.id, false);
        self.transport.publish(&Envelope::typing(&local, false));
        self.emit(SessionEvent::PeersChanged);
    }

    /// Publish `peer-leave` if we announced, stop every task and close the
    /// transport. Takes no async lock, so it also runs from `Drop`.
    /// Returns false if the session was already shut down.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(local_id) = self.local_id.get() {
            self.transport.publish(&Envelope::peer_leave(local_id.clone()));
        }

        let mut tasks = self.task_handles();
        for task in tasks.background.drain(..) {
            task.abort();
        }
        if let Some(timer) = tasks.typing.take() {
            timer.abort();
        }
        drop(tasks);

        self.transport.close();
        true
    }
}

/// One participant in the shared dashboard.
pub struct Session {
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl Session {
    /// Create a session over `transport`. Nothing is published until
    /// [`start`](Self::start).
    pub fn new(config: SessionConfig, transport: impl Transport + 'static) -> Self {
        Self::with_shared_transport(config, Arc::new(transport))
    }

    /// Create a session over a transport the caller keeps a handle to.
    pub fn with_shared_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Create a session that reads timestamps from `clock`.
    pub fn with_clock(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let state = SessionState {
            phase: SessionPhase::Uninitialized,
            local: None,
            replicas: Replicas::new(config.tombstone_capacity),
            typing_generation: 0,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                router: EventRouter::new(),
                clock,
                state: Mutex::new(state),
                event_tx,
                local_id: OnceLock::new(),
                tasks: std::sync::Mutex::new(TaskHandles::default()),
                closed: AtomicBool::new(false),
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Open a transport on `config.channel_name` and wrap it in a session.
    pub fn open(hub: &ChannelHub, config: SessionConfig) -> Self {
        let transport = hub.open(&config.channel_name);
        Self::new(config, transport)
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Generate an identity, announce it and start the background tasks.
    ///
    /// Stays `Uninitialized` if the transport is unavailable; returns the
    /// resulting phase.
    pub async fn start(&self) -> SessionPhase {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.phase != SessionPhase::Uninitialized || shared.is_closed() {
            return state.phase;
        }

        let subscription = match shared.transport.subscribe() {
            Some(subscription) if shared.transport.is_available() => subscription,
            _ => {
                log::warn!("Transport unavailable; running in single-context mode");
                return state.phase;
            }
        };

        let now = shared.now();
        let local = Peer::generate(now);
        state.phase = SessionPhase::Announcing;
        state.replicas.local_id = Some(local.id.clone());
        state.replicas.presence.join_at(local.clone(), now);
        state.local = Some(local.clone());
        shared.transport.publish(&Envelope::PeerJoin(local.clone()));

        let tasks = [
            tokio::spawn(run_inbound(Arc::clone(shared), subscription)),
            tokio::spawn(run_heartbeat(Arc::clone(shared))),
            tokio::spawn(run_maintenance(Arc::clone(shared))),
        ];
        shared
            .task_handles()
            .background
            .extend(tasks.iter().map(|task| task.abort_handle()));
        let _ = shared.local_id.set(local.id.clone());
        state.phase = SessionPhase::Active;

        log::info!(
            "Session {} ({}) active on '{}'",
            local.display_name,
            local.id,
            shared.config.channel_name
        );
        shared.emit(SessionEvent::Connected);
        shared.emit(SessionEvent::PeersChanged);
        state.phase
    }

    /// Post a chat message. `None` for a blank body or an inactive session.
    pub async fn send_message(&self, body: &str, expires_in_minutes: Option<u32>) -> Option<ChatEntry> {
        let (mut state, local) = self.shared.lock_for_mutation().await?;
        let now = self.shared.now();
        let entry = state.replicas.messages.send_at(
            body,
            &local.id,
            &local.display_name,
            &local.color_tag,
            expires_in_minutes,
            now,
        )?;

        self.shared.transport.publish(&Envelope::Message(entry.clone()));
        self.shared.emit(SessionEvent::MessagesChanged);
        Some(entry)
    }

    /// Delete a message everywhere. Returns whether it was held locally;
    /// the delete is broadcast either way.
    pub async fn delete_message(&self, id: &str) -> bool {
        let Some((mut state, _)) = self.shared.lock_for_mutation().await else {
            return false;
        };
        let removed = state.replicas.messages.remove(id);

        self.shared.transport.publish(&Envelope::DeleteMessage(id.to_string()));
        if removed {
            self.shared.emit(SessionEvent::MessagesChanged);
        }
        removed
    }

    /// Add `delta` to the shared counter.
    pub async fn update_counter(&self, delta: i64) -> Option<Counter> {
        let (mut state, local) = self.shared.lock_for_mutation().await?;
        let now = self.shared.now();
        let update = state
            .replicas
            .counter
            .apply_delta_at(delta, &local.id, &local.display_name, now);
        let counter = update.counter();

        self.shared.transport.publish(&Envelope::CounterUpdate(update));
        self.shared.emit(SessionEvent::CounterChanged(counter.clone()));
        Some(counter)
    }

    /// Zero the shared counter.
    pub async fn reset_counter(&self) -> Option<Counter> {
        let (mut state, _) = self.shared.lock_for_mutation().await?;
        let now = self.shared.now();
        let counter = state.replicas.counter.reset_at(now);

        self.shared.transport.publish(&Envelope::CounterReset);
        self.shared.emit(SessionEvent::CounterChanged(counter.clone()));
        Some(counter)
    }

    /// Signal (or stop signalling) that we are composing a message.
    pub async fn set_typing(&self, is_composing: bool) {
        self.shared.set_typing(is_composing).await;
    }

    /// Refresh our activity and tell the others, outside the heartbeat.
    pub async fn update_activity(&self) {
        self.shared.heartbeat().await;
    }

    /// Announce departure and stop all background work. Idempotent.
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if matches!(state.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return;
        }

        state.phase = SessionPhase::Closing;
        self.shared.shutdown();
        state.phase = SessionPhase::Closed;
        if let Some(local) = &state.local {
            log::info!("Session {} closed", local.display_name);
        }
        self.shared.emit(SessionEvent::Disconnected);
    }

    /// Every known peer, ourselves included.
    pub async fn peers(&self) -> Vec<Peer> {
        self.shared.state.lock().await.replicas.presence.list()
    }

    /// Chat entries in receipt order.
    pub async fn messages(&self) -> Vec<ChatEntry> {
        self.shared.state.lock().await.replicas.messages.list()
    }

    /// Current counter snapshot.
    pub async fn counter(&self) -> Counter {
        self.shared.state.lock().await.replicas.counter.snapshot()
    }

    /// Our own current presence record.
    pub async fn local_peer(&self) -> Option<Peer> {
        self.shared.state.lock().await.local_record()
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.shared.phase().await
    }

    /// Whether the transport is available.
    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_available()
    }

    /// Settings this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.shutdown() {
            log::debug!("Session dropped without close");
        }
        // A task may hold the lock right now; phase() reports Closed anyway.
        if let Ok(mut state) = self.shared.state.try_lock() {
            state.phase = SessionPhase::Closed;
        }
    }
}

async fn run_inbound(shared: Arc<Shared>, mut subscription: Subscription) {
    while let Some(bytes) = subscription.recv().await {
        shared.handle_frame(&bytes).await;
    }
    log::debug!("Inbound pump stopped");
}

/// First tick one full period after start. Zero periods are clamped.
fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_heartbeat(shared: Arc<Shared>) {
    let mut ticker = ticker(shared.config.heartbeat_interval());
    loop {
        ticker.tick().await;
        shared.heartbeat().await;
    }
}

async fn run_maintenance(shared: Arc<Shared>) {
    let mut ticker = ticker(shared.config.maintenance_interval());
    loop {
        ticker.tick().await;
        shared.maintenance().await;
    }
}
