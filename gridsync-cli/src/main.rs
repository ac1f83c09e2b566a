//! gridsync-cli — demo session runner for the collaborative channel.
//!
//! Spins up an in-process relay and bus, attaches two editing sessions to
//! the same spreadsheet, and lets them exchange a handful of revisions.
//! Run with `RUST_LOG=debug` to watch the dispatch/broadcast traffic.

use std::sync::Arc;

use gridsync_collab::{
    BusConfig, CollabEnv, CollaborativeChannel, LocalRelay, MessageBus, RelayConfig,
};
use log::info;
use serde_json::json;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bus = Arc::new(MessageBus::new(BusConfig::default()));
    let relay = Arc::new(LocalRelay::new(bus.clone(), RelayConfig::default()));
    let env = CollabEnv::new(bus.clone(), relay.clone());

    let alice = CollaborativeChannel::new(&env, "spreadsheet.document", 1);
    let bob = CollaborativeChannel::new(&env, "spreadsheet.document", 1);

    alice.on_new_message("alice-model", |revision| {
        info!("alice applied {}", revision.payload);
    });
    bob.on_new_message("bob-model", |revision| {
        info!("bob applied {}", revision.payload);
    });

    alice
        .send_message(json!({
            "type": "UPDATE_CELL",
            "sheet": "Sheet1",
            "cell": "A1",
            "content": "=SUM(B1:B4)"
        }))
        .await
        .expect("dispatch failed");

    bob.send_message(json!({
            "type": "UPDATE_CELL",
            "sheet": "Sheet1",
            "cell": "B1",
            "content": "42"
        }))
        .await
        .expect("dispatch failed");

    // Let the broadcast deliveries land before reading the counters.
    sleep(Duration::from_millis(100)).await;

    let relay_stats = relay.stats();
    let bus_stats = bus.stats();
    info!(
        "relay: {} accepted, {} rejected; bus: {} published, {} lagged",
        relay_stats.revisions_accepted,
        relay_stats.revisions_rejected,
        bus_stats.notifications_published,
        bus_stats.notifications_lagged
    );

    alice.leave();
    bob.leave();
}
