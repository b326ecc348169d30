//! The receiver's SSH server overlay: runs one SSH session on an
//! already-connected socket (spec §4.3 steps 6-8).

mod forward;
mod handler;
mod keepalive;
mod pty_shell;
mod session;

pub use forward::{DirectForward, ReverseForwardListener};
pub use session::{keepalive_timeout_from_sender, ReceiverSessionConfig, SessionEnded};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::server::Config as RusshConfig;
use ssh_portal_common::Secret;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::error::SshPortalError;
use handler::ReceiverHandler;
use session::SharedState;

/// Runs one receiver SSH-server session to completion on an already-spliced
/// socket: brings up the SSH server with the ephemeral host key and the
/// one-shot password, services channels/forwards, and returns once the SSH
/// connection has fully torn down (spec §4.3 steps 6-8).
pub async fn run_receiver_session<S>(
    stream: S,
    host_key: PrivateKey,
    expected_user: String,
    expected_password: Secret<String>,
    sender_addr: SocketAddr,
    keepalive_timeout: Option<Duration>,
    config: ReceiverSessionConfig,
) -> SessionEnded
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let russh_config = Arc::new(RusshConfig {
        keys: vec![host_key],
        ..Default::default()
    });

    let state = SharedState::new(expected_user, expected_password, sender_addr, config, keepalive_timeout);
    let handler = ReceiverHandler::new(state.clone());

    let watchdog = tokio::spawn(keepalive::run_watchdog(state.clone()));

    info!(%sender_addr, "ssh server session starting");
    let result = russh::server::run_stream(russh_config, stream, handler).await;
    watchdog.abort();
    state.teardown_all().await;

    match result {
        Ok(_) => SessionEnded::PeerDisconnected,
        Err(e) => SessionEnded::Error(SshPortalError::from(e).into()),
    }
}
