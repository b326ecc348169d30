//! Sender-side reverse forward registry (spec §3 `ReverseForwardRequest`,
//! §4.4 "Reverse forward registry"): a remote listener obtained from the
//! receiver via `tcpip-forward`, dialing a local target per accepted
//! connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use russh::client::Handle;
use russh::{Channel, Msg};
use tokio::net::TcpStream;
use tracing::warn;

use crate::bridge::bridge_channel_tcp;
use crate::client::error::SenderError;
use crate::client::handler::SenderHandler;

#[derive(Clone, Debug)]
pub struct ReverseForwardInfo {
    pub bind_addr: String,
    pub bind_port: u32,
    pub local_target: String,
    pub created_at: SystemTime,
}

#[derive(Default)]
pub struct ReverseForwardRegistry {
    inner: tokio::sync::Mutex<HashMap<(String, u32), ReverseForwardInfo>>,
}

impl ReverseForwardRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// spec §4.4 `Start`: asks the SSH client to open a remote listener,
    /// recording the assigned port.
    pub async fn start(
        &self,
        handle: &Handle<SenderHandler>,
        bind_addr: &str,
        bind_port: u32,
        local_target: &str,
    ) -> Result<u32, SenderError> {
        local_target
            .parse::<std::net::SocketAddr>()
            .map_err(|_| SenderError::InvalidAddress(local_target.to_string()))?;

        let actual_port = handle.tcpip_forward(bind_addr.to_string(), bind_port).await?;
        self.inner.lock().await.insert(
            (bind_addr.to_string(), actual_port),
            ReverseForwardInfo {
                bind_addr: bind_addr.to_string(),
                bind_port: actual_port,
                local_target: local_target.to_string(),
                created_at: SystemTime::now(),
            },
        );
        Ok(actual_port)
    }

    pub async fn stop(&self, handle: &Handle<SenderHandler>, bind_addr: &str, bind_port: u32) -> Result<(), SenderError> {
        handle.cancel_tcpip_forward(bind_addr.to_string(), bind_port).await?;
        self.inner.lock().await.remove(&(bind_addr.to_string(), bind_port));
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<ReverseForwardInfo> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    /// Called from the `Handler` when the receiver opens a `forwarded-tcpip`
    /// channel for one accepted connection on its listener; dials the local
    /// target recorded for that bind address/port and bridges.
    pub async fn handle_incoming(
        &self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
    ) {
        let local_target = {
            let inner = self.inner.lock().await;
            inner
                .get(&(connected_address.to_string(), connected_port))
                .map(|info| info.local_target.clone())
        };
        let Some(local_target) = local_target else {
            warn!(%connected_address, connected_port, "forwarded-tcpip for unknown reverse forward");
            return;
        };
        match TcpStream::connect(&local_target).await {
            Ok(tcp) => bridge_channel_tcp(channel, tcp).await,
            Err(e) => warn!(%local_target, error = %e, "reverse forward local dial failed"),
        }
    }
}
