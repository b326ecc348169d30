//! Shared per-connection state for the receiver's SSH server overlay (spec
//! §4.3): credentials to check, the keepalive watchdog's clock, and the
//! direct/reverse forward and session-channel registries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::server::Handle;
use russh::ChannelId;
use ssh_portal_common::Secret;
use tokio::sync::{Mutex, OnceCell};

use crate::server::forward::{DirectForwardRegistry, ReverseForwardRegistry};
use crate::server::pty_shell::ShellProcess;

pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const WATCHDOG_TICK: Duration = Duration::from_secs(5);

/// `sender.keepalive` overrides the receiver's default keepalive timeout
/// only when positive (spec §4.3 step 6); zero or absent keeps the default.
pub fn keepalive_timeout_from_sender(requested: Option<u32>) -> Option<Duration> {
    requested.filter(|s| *s > 0).map(|s| Duration::from_secs(s as u64))
}

/// Distinguishes a clean peer-driven teardown from an actual error, so the
/// receiver's restart loop (owned by the binary crate) can pick its backoff
/// (spec §4.3, §9 design notes).
#[derive(Debug)]
pub enum SessionEnded {
    PeerDisconnected,
    Error(anyhow::Error),
}

pub struct ReceiverSessionConfig {
    pub session_enabled: bool,
}

pub struct SessionChannelState {
    pub pty_allocated: bool,
    pub process: Option<ShellProcess>,
}

pub struct SharedState {
    pub expected_user: String,
    pub expected_password: Secret<String>,
    pub sender_addr: SocketAddr,
    pub config: ReceiverSessionConfig,

    handle: OnceCell<Handle>,
    keepalive_timeout: Mutex<Duration>,
    last_keepalive: Mutex<Instant>,

    pub direct_forwards: DirectForwardRegistry,
    pub reverse_forwards: ReverseForwardRegistry,
    pub sessions: Mutex<HashMap<ChannelId, SessionChannelState>>,
}

impl SharedState {
    pub fn new(
        expected_user: String,
        expected_password: Secret<String>,
        sender_addr: SocketAddr,
        config: ReceiverSessionConfig,
        keepalive_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            expected_user,
            expected_password,
            sender_addr,
            config,
            handle: OnceCell::new(),
            keepalive_timeout: Mutex::new(keepalive_timeout.unwrap_or(DEFAULT_KEEPALIVE_TIMEOUT).max(Duration::from_millis(1))),
            last_keepalive: Mutex::new(Instant::now()),
            direct_forwards: DirectForwardRegistry::default(),
            reverse_forwards: ReverseForwardRegistry::default(),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn checks_out(&self, user: &str, password: &str) -> bool {
        user == self.expected_user && password == self.expected_password.expose_secret().as_str()
    }

    pub async fn record_handle(&self, handle: Handle) {
        let _ = self.handle.set(handle);
    }

    pub async fn touch_keepalive(&self) {
        *self.last_keepalive.lock().await = Instant::now();
    }

    /// `now - lastKeepalive > timeout` (spec §4.3 Keepalive watchdog).
    pub async fn keepalive_expired(&self) -> bool {
        let timeout = *self.keepalive_timeout.lock().await;
        self.last_keepalive.lock().await.elapsed() > timeout
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.handle.get() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "keepalive timeout".to_string(), "en".to_string())
                .await;
        }
    }

    /// Tears down every tracked forward and session channel (spec §4.3 step
    /// 8, run on channel-loop end).
    pub async fn teardown_all(&self) {
        self.reverse_forwards.cancel_all().await;
        self.sessions.lock().await.clear();
    }
}
