//! Receiver-side forward bookkeeping: `DirectForward` (spec §3) for live
//! `direct-tcpip` bridges and `ReverseForwardListener` for live `tcpip-forward`
//! listeners. Both are snapshot-style registries guarded by a single lock, as
//! spec §5 requires for all owner-side registries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use russh::ChannelId;
use tokio::sync::{oneshot, Mutex};

#[derive(Clone, Debug)]
pub struct DirectForward {
    pub channel: ChannelId,
    pub origin: String,
    pub destination: String,
    pub created_at: SystemTime,
    pub sender_addr: SocketAddr,
}

#[derive(Default)]
pub struct DirectForwardRegistry {
    inner: Mutex<HashMap<ChannelId, DirectForward>>,
}

impl DirectForwardRegistry {
    pub async fn insert(&self, forward: DirectForward) {
        self.inner.lock().await.insert(forward.channel, forward);
    }

    pub async fn remove(&self, channel: ChannelId) {
        self.inner.lock().await.remove(&channel);
    }

    pub async fn snapshot(&self) -> Vec<DirectForward> {
        self.inner.lock().await.values().cloned().collect()
    }
}

/// Cancels a reverse-forward listener's accept loop by dropping the paired
/// `oneshot::Receiver`'s sender; the accept loop selects on it alongside
/// `listener.accept()`.
pub struct CancelHandle(Option<oneshot::Sender<()>>);

impl CancelHandle {
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReverseForwardListener {
    pub bind_addr: String,
    pub bind_port: u32,
    pub created_at: SystemTime,
    pub last_origin: Option<String>,
}

struct ReverseForwardHandle {
    info: ReverseForwardListener,
    cancel: CancelHandle,
}

#[derive(Default)]
pub struct ReverseForwardRegistry {
    inner: Mutex<HashMap<(String, u32), ReverseForwardHandle>>,
}

impl ReverseForwardRegistry {
    pub async fn insert(&self, bind_addr: String, bind_port: u32, cancel: CancelHandle) {
        self.inner.lock().await.insert(
            (bind_addr.clone(), bind_port),
            ReverseForwardHandle {
                info: ReverseForwardListener {
                    bind_addr,
                    bind_port,
                    created_at: SystemTime::now(),
                    last_origin: None,
                },
                cancel,
            },
        );
    }

    pub async fn set_last_origin(&self, bind_addr: &str, bind_port: u32, origin: String) {
        if let Some(handle) = self.inner.lock().await.get_mut(&(bind_addr.to_string(), bind_port)) {
            handle.info.last_origin = Some(origin);
        }
    }

    /// Removes and cancels the listener matching `(bind_addr, bind_port)`.
    /// Returns whether one was found (spec §4.3 `cancel-tcpip-forward`).
    pub async fn cancel(&self, bind_addr: &str, bind_port: u32) -> bool {
        let Some(handle) = self.inner.lock().await.remove(&(bind_addr.to_string(), bind_port)) else {
            return false;
        };
        handle.cancel.cancel();
        true
    }

    pub async fn cancel_all(&self) {
        let mut inner = self.inner.lock().await;
        for (_, handle) in inner.drain() {
            handle.cancel.cancel();
        }
    }

    pub async fn snapshot(&self) -> Vec<ReverseForwardListener> {
        self.inner.lock().await.values().map(|h| h.info.clone()).collect()
    }
}
