//! Sender-side local forward registry (spec §3 `LocalForward`, §4.4 "Local
//! forward registry"): a local TCP listener whose accepts become
//! `direct-tcpip` channels dialed against the receiver.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use russh::client::Handle;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::warn;

use crate::bridge::bridge_channel_tcp;
use crate::client::error::SenderError;
use crate::client::handler::SenderHandler;

pub type LocalForwardId = u64;

#[derive(Clone, Debug)]
pub struct LocalForwardInfo {
    pub listen_addr: String,
    pub target_addr: String,
    pub created_at: SystemTime,
}

struct Entry {
    info: LocalForwardInfo,
    cancel: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
pub struct LocalForwardRegistry {
    inner: tokio::sync::Mutex<HashMap<LocalForwardId, Entry>>,
    next_id: AtomicU64,
}

impl LocalForwardRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// spec §4.4 `Create`: opens a local listener and starts its accept
    /// loop; each accepted connection dials `direct-tcpip` against the
    /// receiver through `handle`.
    pub async fn create(
        &self,
        handle: Handle<SenderHandler>,
        listen_addr: &str,
        target_addr: &str,
    ) -> Result<LocalForwardId, SenderError> {
        listen_addr
            .parse::<SocketAddr>()
            .map_err(|_| SenderError::InvalidAddress(listen_addr.to_string()))?;
        let target: SocketAddr = target_addr
            .parse()
            .map_err(|_| SenderError::InvalidAddress(target_addr.to_string()))?;

        let listener = TcpListener::bind(listen_addr).await?;
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let target_host = target.ip().to_string();
        let target_port = target.port() as u32;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    accepted = listener.accept() => {
                        let Ok((tcp, origin)) = accepted else { break };
                        let handle = handle.clone();
                        let target_host = target_host.clone();
                        tokio::spawn(async move {
                            match handle
                                .channel_open_direct_tcpip(target_host, target_port, origin.ip().to_string(), origin.port() as u32)
                                .await
                            {
                                Ok(channel) => bridge_channel_tcp(channel, tcp).await,
                                Err(e) => warn!(error = ?e, "direct-tcpip open failed"),
                            }
                        });
                    }
                }
            }
            let _ = done_tx.send(());
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().await.insert(
            id,
            Entry {
                info: LocalForwardInfo {
                    listen_addr: listen_addr.to_string(),
                    target_addr: target_addr.to_string(),
                    created_at: SystemTime::now(),
                },
                cancel: Some(cancel_tx),
                done: Some(done_rx),
            },
        );
        Ok(id)
    }

    /// spec §4.4 `Delete`: cancels, waiting up to 5s for the accept loop to
    /// drain (spec §5 "Local-forward delete waits up to 5s").
    pub async fn delete(&self, id: LocalForwardId) {
        let entry = self.inner.lock().await.remove(&id);
        let Some(mut entry) = entry else { return };
        if let Some(cancel) = entry.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(done) = entry.done.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), done).await;
        }
    }

    pub async fn close_all(&self) {
        let ids: Vec<_> = self.inner.lock().await.keys().copied().collect();
        for id in ids {
            self.delete(id).await;
        }
    }

    pub async fn snapshot(&self) -> Vec<(LocalForwardId, LocalForwardInfo)> {
        self.inner.lock().await.iter().map(|(id, e)| (*id, e.info.clone())).collect()
    }
}
