//! Background reaper: every 60s, expires stale invites and evicts stale
//! rate-limit entries (spec §4.2).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pairing::RelayState;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_reaper(state: Arc<RelayState>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let expired = {
                    let mut invites = state.invites.lock().await;
                    invites.reap_expired(SystemTime::now())
                };
                if !expired.is_empty() {
                    info!(count = expired.len(), "reaped expired invites");
                }
                state.rate_limiter.reap().await;
            }
        }
    }
}
