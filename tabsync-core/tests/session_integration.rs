//! Integration tests for multi-tab synchronization.
//!
//! These tests open several sessions on one in-process hub and verify
//! that presence, chat and counter state converge through the full
//! encode → broadcast → dispatch path.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tabsync_core::hub::ChannelHub;
use tabsync_core::model::Peer;
use tabsync_core::protocol::{Envelope, EnvelopeKind};
use tabsync_core::session::{Session, SessionEvent, SessionPhase};
use tabsync_core::transport::{BroadcastTransport, Subscription, Transport};
use tabsync_core::SessionConfig;
use tokio::time::{sleep, timeout, Duration};

const CHANNEL: &str = "integration-dashboard";

fn config() -> SessionConfig {
    SessionConfig {
        channel_name: CHANNEL.into(),
        ..SessionConfig::default()
    }
}

/// Poll `check` until it holds or two seconds pass.
async fn wait_for<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(Duration::from_secs(2), async {
        loop {
            if check().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Start two sessions and wait until each sees the other.
async fn start_pair(hub: &ChannelHub) -> (Session, Session) {
    let a = Session::open(hub, config());
    let b = Session::open(hub, config());
    assert_eq!(a.start().await, SessionPhase::Active);
    assert_eq!(b.start().await, SessionPhase::Active);

    let (ra, rb) = (&a, &b);
    assert!(
        wait_for(move || async move { ra.peers().await.len() == 2 && rb.peers().await.len() == 2 }).await,
        "Sessions should discover each other"
    );
    (a, b)
}

fn typing_signals(wire: &mut Subscription) -> Vec<bool> {
    let mut signals = Vec::new();
    while let Some(bytes) = wire.try_recv() {
        if let Ok(Envelope::Typing(signal)) = Envelope::decode(&bytes) {
            signals.push(signal.is_composing);
        }
    }
    signals
}

/// Drops the first `n` counter updates it is asked to publish.
struct LossyTransport {
    inner: BroadcastTransport,
    counter_updates_to_drop: AtomicUsize,
}

impl Transport for LossyTransport {
    fn publish(&self, envelope: &Envelope) {
        let lost = envelope.kind() == EnvelopeKind::CounterUpdate
            && self
                .counter_updates_to_drop
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if !lost {
            self.inner.publish(envelope);
        }
    }

    fn subscribe(&self) -> Option<Subscription> {
        self.inner.subscribe()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

// ─── Presence ────────────────────────────────────────────────────

#[tokio::test]
async fn test_late_joiner_sees_existing_peer() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    let a_id = a.local_peer().await.unwrap().id;
    let b_id = b.local_peer().await.unwrap().id;
    assert!(b.peers().await.iter().any(|p| p.id == a_id));
    assert!(a.peers().await.iter().any(|p| p.id == b_id));
}

#[tokio::test]
async fn test_close_removes_peer_elsewhere() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    a.close().await;
    let rb = &b;
    assert!(wait_for(move || async move { rb.peers().await.len() == 1 }).await);
    assert_eq!(a.phase().await, SessionPhase::Closed);
}

#[tokio::test]
async fn test_dropped_session_leaves() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    drop(a);
    let rb = &b;
    assert!(wait_for(move || async move { rb.peers().await.len() == 1 }).await);
}

#[tokio::test]
async fn test_silent_peer_is_swept_by_maintenance() {
    let hub = ChannelHub::with_capacity(64);
    let a = Session::open(
        &hub,
        SessionConfig {
            maintenance_interval_ms: 50,
            inactivity_timeout_ms: 100,
            ..config()
        },
    );
    a.start().await;

    let raw = hub.open(CHANNEL);
    raw.publish(&Envelope::PeerJoin(Peer::new("ghost", "Ghost", "#FF6B6B", 0)));
    let ra = &a;
    assert!(wait_for(move || async move { ra.peers().await.len() == 2 }).await);

    sleep(Duration::from_millis(400)).await;
    let peers = a.peers().await;
    let local = a.local_peer().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, local.id);
}

// ─── Chat ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_message_reaches_other_tab() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    let sent = a.send_message("hi", None).await.unwrap();
    assert_eq!(sent.expires_at, None);

    let rb = &b;
    assert!(wait_for(move || async move { rb.messages().await.len() == 1 }).await);
    let received = &b.messages().await[0];
    assert_eq!(received.body, "hi");
    assert_eq!(received.id, sent.id);
    assert_eq!(received.author_id, sent.author_id);
    assert_eq!(received.expires_at, None);
}

#[tokio::test]
async fn test_delete_propagates_to_author() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    let sent = a.send_message("short-lived", Some(10)).await.unwrap();
    let rb = &b;
    assert!(wait_for(move || async move { rb.messages().await.len() == 1 }).await);

    // Anyone may delete, not only the author.
    assert!(b.delete_message(&sent.id).await);
    let ra = &a;
    assert!(wait_for(move || async move { ra.messages().await.is_empty() }).await);
}

#[tokio::test]
async fn test_message_event_reaches_observer() {
    let hub = ChannelHub::with_capacity(64);
    let a = Session::open(&hub, config());
    let mut b = Session::open(&hub, config());
    let mut events = b.take_event_rx().unwrap();
    a.start().await;
    b.start().await;

    a.send_message("ping", None).await;

    let saw_message = timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event == SessionEvent::MessagesChanged {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(saw_message, Ok(true)));
}

// ─── Counter ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_counter_snapshot_survives_lost_update() {
    let hub = ChannelHub::with_capacity(64);
    let lossy = LossyTransport {
        inner: hub.open(CHANNEL),
        counter_updates_to_drop: AtomicUsize::new(1),
    };
    let a = Session::new(config(), lossy);
    let b = Session::open(&hub, config());
    a.start().await;
    b.start().await;

    let (ra, rb) = (&a, &b);
    assert!(wait_for(move || async move { ra.peers().await.len() == 2 && rb.peers().await.len() == 2 }).await);

    assert_eq!(a.update_counter(5).await.unwrap().value, 5);
    assert_eq!(a.update_counter(-2).await.unwrap().value, 3);

    assert!(wait_for(move || async move { rb.counter().await.value == 3 }).await);
    let a_name = a.local_peer().await.unwrap().display_name;
    assert_eq!(b.counter().await.last_writer_name, a_name);
}

#[tokio::test]
async fn test_late_joiner_receives_counter() {
    let hub = ChannelHub::with_capacity(64);
    let a = Session::open(&hub, config());
    a.start().await;
    a.update_counter(7).await;

    let b = Session::open(&hub, config());
    b.start().await;

    let rb = &b;
    assert!(wait_for(move || async move { rb.counter().await.value == 7 }).await);
}

#[tokio::test]
async fn test_reset_propagates() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;

    a.update_counter(4).await;
    let rb = &b;
    assert!(wait_for(move || async move { rb.counter().await.value == 4 }).await);

    b.reset_counter().await;
    let ra = &a;
    assert!(wait_for(move || async move { ra.counter().await.value == 0 }).await);
}

#[tokio::test]
async fn test_three_tabs_converge() {
    let hub = ChannelHub::with_capacity(128);
    let (a, b) = start_pair(&hub).await;
    let c = Session::open(&hub, config());
    c.start().await;

    let (ra, rb, rc) = (&a, &b, &c);
    assert!(
        wait_for(move || async move {
            ra.peers().await.len() == 3 && rb.peers().await.len() == 3 && rc.peers().await.len() == 3
        })
        .await
    );

    a.update_counter(1).await;
    sleep(Duration::from_millis(20)).await;
    b.update_counter(10).await;
    sleep(Duration::from_millis(20)).await;
    c.send_message("all here", None).await;

    assert!(
        wait_for(move || async move {
            let expected = rb.counter().await;
            ra.counter().await == expected
                && rc.counter().await == expected
                && ra.messages().await.len() == 1
                && rb.messages().await.len() == 1
        })
        .await
    );
    assert_eq!(c.counter().await.value, 11);
}

// ─── Robustness ──────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let hub = ChannelHub::with_capacity(64);
    let (a, b) = start_pair(&hub).await;
    let raw = hub.open(CHANNEL);

    raw.publish_raw(b"definitely not json".to_vec());
    raw.publish_raw(br#"{"kind":"mystery","payload":{}}"#.to_vec());
    raw.publish_raw(br#"{"kind":"message"}"#.to_vec());
    raw.publish_raw(br#"{"kind":"counter-update","payload":{"value":"x"}}"#.to_vec());

    a.send_message("still alive", None).await;
    let rb = &b;
    assert!(wait_for(move || async move { rb.messages().await.len() == 1 }).await);
    assert_eq!(b.phase().await, SessionPhase::Active);
    assert_eq!(b.peers().await.len(), 2);
    assert!(b.counter().await.last_writer_at == 0);
}

#[tokio::test]
async fn test_sessions_on_other_channels_are_isolated() {
    let hub = ChannelHub::with_capacity(64);
    let a = Session::open(&hub, config());
    let other = Session::open(
        &hub,
        SessionConfig {
            channel_name: "elsewhere".into(),
            ..config()
        },
    );
    a.start().await;
    other.start().await;

    a.send_message("private", None).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(other.peers().await.len(), 1);
    assert!(other.messages().await.is_empty());
}

// ─── Typing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_typing_renewals_send_single_stop() {
    let hub = ChannelHub::with_capacity(64);
    let observer = hub.open(CHANNEL);
    let mut wire = observer.subscribe().unwrap();

    let a = Session::open(&hub, config());
    a.start().await;

    for _ in 0..3 {
        a.set_typing(true).await;
        sleep(Duration::from_millis(500)).await;
    }

    // Last renewal at +1000ms, so the stop is due at +4000ms.
    sleep(Duration::from_millis(2_400)).await;
    assert_eq!(typing_signals(&mut wire), vec![true, true, true]);
    assert!(a.local_peer().await.unwrap().is_composing);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(typing_signals(&mut wire), vec![false]);
    assert!(!a.local_peer().await.unwrap().is_composing);

    sleep(Duration::from_secs(10)).await;
    assert!(typing_signals(&mut wire).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_flag_clears() {
    let hub = ChannelHub::with_capacity(64);
    let a = Session::open(&hub, config());
    let b = Session::open(&hub, config());
    a.start().await;
    b.start().await;
    sleep(Duration::from_millis(10)).await;

    let a_id = a.local_peer().await.unwrap().id;
    a.set_typing(true).await;
    sleep(Duration::from_millis(10)).await;
    let composing = b.peers().await.into_iter().find(|p| p.id == a_id).unwrap();
    assert!(composing.is_composing);

    sleep(Duration::from_millis(3_100)).await;
    let idle = b.peers().await.into_iter().find(|p| p.id == a_id).unwrap();
    assert!(!idle.is_composing);
}
