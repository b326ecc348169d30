//! Receiver-side keepalive watchdog (spec §4.3 "Keepalive watchdog", §9
//! design notes): a 5s check tick comparing `now - lastKeepalive` against a
//! timeout, rather than a per-read deadline reset.

use std::sync::Arc;

use tracing::warn;

use super::session::{SharedState, WATCHDOG_TICK};

pub async fn run_watchdog(state: Arc<SharedState>) {
    let mut ticker = tokio::time::interval(WATCHDOG_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if state.keepalive_expired().await {
            warn!("keepalive timed out, closing session");
            state.disconnect().await;
            return;
        }
    }
}
