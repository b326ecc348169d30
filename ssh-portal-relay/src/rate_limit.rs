//! Per-IP rate limiting for sender pairing attempts (spec §3 `RateLimitEntry`,
//! §4.2 step 1). This is a plain failure counter rather than a token bucket:
//! the spec's back-pressure semantics (sleep, don't reject, on the Nth
//! failure within a window) don't map onto a leaky/token-bucket model, so a
//! `Mutex<HashMap<..>>` expresses it directly instead.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const FAILURE_THRESHOLD: u32 = 3;
pub const WINDOW: Duration = Duration::from_secs(60);
pub const BACKOFF: Duration = Duration::from_secs(3);

struct Entry {
    failures: u32,
    last_fail_at: Instant,
}

pub struct RateLimiter {
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// If the IP has accumulated `FAILURE_THRESHOLD` or more failures within
    /// the window, sleeps `BACKOFF` before returning. Never rejects.
    pub async fn maybe_backoff(&self, ip: IpAddr) {
        let should_sleep = {
            let entries = self.entries.lock().await;
            entries
                .get(&ip)
                .is_some_and(|e| e.failures >= FAILURE_THRESHOLD && e.last_fail_at.elapsed() < WINDOW)
        };
        if should_sleep {
            tokio::time::sleep(BACKOFF).await;
        }
    }

    pub async fn record_failure(&self, ip: IpAddr) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries.entry(ip).or_insert(Entry {
            failures: 0,
            last_fail_at: now,
        });
        if entry.last_fail_at.elapsed() >= WINDOW {
            entry.failures = 0;
        }
        entry.failures += 1;
        entry.last_fail_at = now;
    }

    pub async fn reset(&self, ip: IpAddr) {
        self.entries.lock().await.remove(&ip);
    }

    /// Evicts entries whose last failure fell outside the window (called by
    /// the relay's 60s reaper tick).
    pub async fn reap(&self) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.last_fail_at.elapsed() < WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn does_not_backoff_below_threshold() {
        let rl = RateLimiter::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        rl.record_failure(ip).await;
        rl.record_failure(ip).await;
        let start = Instant::now();
        rl.maybe_backoff(ip).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn backs_off_at_threshold() {
        let rl = RateLimiter::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..3 {
            rl.record_failure(ip).await;
        }
        let start = Instant::now();
        rl.maybe_backoff(ip).await;
        assert!(start.elapsed() >= BACKOFF);
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let rl = RateLimiter::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..3 {
            rl.record_failure(ip).await;
        }
        rl.reset(ip).await;
        let start = Instant::now();
        rl.maybe_backoff(ip).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
