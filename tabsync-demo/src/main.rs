//! Tabsync demo: three simulated tabs sharing one dashboard.
//!
//! Opens three sessions on an in-process hub, runs a short scripted
//! exchange (chat, counter edits, typing, one tab closing) and prints
//! each remaining tab's converged view as JSON.
//!
//! Configuration comes from `$TABSYNC_CONFIG` or `config/session.json`;
//! run with `RUST_LOG=debug` to watch the envelopes being routed.

use log::info;
use serde::Serialize;
use std::error::Error;
use std::time::Duration;

use tabsync_core::{load_config, ChannelHub, ChatEntry, Counter, Peer, Session};

const DEFAULT_CONFIG_PATH: &str = "config/session.json";

/// What one tab currently shows.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TabView {
    tab: String,
    peers: Vec<Peer>,
    messages: Vec<ChatEntry>,
    counter: Counter,
}

impl TabView {
    async fn capture(session: &Session) -> Self {
        let tab = session
            .local_peer()
            .await
            .map(|p| p.display_name)
            .unwrap_or_default();
        Self {
            tab,
            peers: session.peers().await,
            messages: session.messages().await,
            counter: session.counter().await,
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::var("TABSYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path);
    info!(
        "Starting tabsync demo on channel '{}' (hub capacity {})",
        config.session.channel_name, config.hub.capacity
    );

    let hub = ChannelHub::new(config.hub.clone());
    let tabs: Vec<Session> = (0..3)
        .map(|_| Session::open(&hub, config.session.clone()))
        .collect();
    for tab in &tabs {
        tab.start().await;
        settle().await;
    }

    let [first, second, third] = &tabs[..] else {
        return Err("expected three tabs".into());
    };

    first.set_typing(true).await;
    first.send_message("Hello from the first tab", None).await;
    first.set_typing(false).await;
    second.send_message("This one disappears in a minute", Some(1)).await;
    settle().await;

    first.update_counter(5).await;
    settle().await;
    second.update_counter(-2).await;
    settle().await;
    third.update_counter(10).await;
    settle().await;

    if let Some(doomed) = second.messages().await.last() {
        third.delete_message(&doomed.id).await;
    }
    third.close().await;
    settle().await;

    for tab in &tabs[..2] {
        let view = TabView::capture(tab).await;
        println!("{}", serde_json::to_string_pretty(&view)?);
    }

    if let Some(stats) = hub.stats(&config.session.channel_name) {
        info!(
            "Channel stats: {} frames sent, {} dropped, {} transports open",
            stats.frames_sent, stats.frames_dropped, stats.open_transports
        );
    }

    for tab in &tabs {
        tab.close().await;
    }
    Ok(())
}
