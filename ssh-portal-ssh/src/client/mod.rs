//! The sender's SSH client overlay (spec §4.4): the relay handshake up to
//! the point SSH takes over, the keepalive emitter, and the local/reverse
//! forward registries layered on top of the resulting connection.

mod error;
mod handler;
mod local_forward;
mod reverse_forward;

pub use error::SenderError;
pub use local_forward::{LocalForwardId, LocalForwardInfo, LocalForwardRegistry};
pub use reverse_forward::{ReverseForwardInfo, ReverseForwardRegistry};

use std::sync::Arc;
use std::time::Duration;

use russh::client::{connect_stream, Config as RusshClientConfig, Handle};
use ssh_portal_codec::{parse_user_code, Frame, HandshakeReader, PrefixedStream, SenderMeta};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use handler::SenderHandler;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// What `ConnectAndHandshake` hands back: the authenticated SSH client
/// handle plus the pinned receiver fingerprint (spec §4.4 step 6).
pub struct SenderHandshake {
    pub handle: Handle<SenderHandler>,
    pub server_fp: String,
    pub reverse_forwards: Arc<ReverseForwardRegistry>,
}

/// Dials the relay, speaks the sender side of the framing handshake, and
/// runs the SSH client handshake on the same socket with the fingerprint the
/// relay handed back pinned as the host key (spec §4.4 steps 1-6).
pub async fn connect_and_handshake(
    relay_addr: &str,
    user_code: &str,
    keepalive_seconds: Option<u32>,
    identity: Option<String>,
    token: Option<String>,
) -> Result<SenderHandshake, SenderError> {
    let (relay_b64, _receiver_b64, full_b64) = parse_user_code(user_code)?;

    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(relay_addr))
        .await
        .map_err(|_| SenderError::ConnectTimeout)??;

    let (server_fp, residual, tcp) = timeout(HANDSHAKE_TIMEOUT, frame_handshake(tcp, relay_b64.clone(), token, identity, keepalive_seconds))
        .await
        .map_err(|_| SenderError::HandshakeTimeout)??;

    let reverse_forwards = ReverseForwardRegistry::new();
    let sender_handler = SenderHandler {
        expected_fp: server_fp.clone(),
        reverse_forwards: reverse_forwards.clone(),
    };

    let stream = PrefixedStream::new(residual, tcp);
    let russh_config = Arc::new(RusshClientConfig::default());
    let mut handle = connect_stream(russh_config, stream, sender_handler).await?;

    let authenticated = handle.authenticate_password(relay_b64, full_b64).await?;
    if !authenticated.success() {
        return Err(SenderError::Authentication);
    }

    info!(fp = %server_fp, "sender ssh handshake complete");
    Ok(SenderHandshake {
        handle,
        server_fp,
        reverse_forwards,
    })
}

/// spec §4.4 steps 3-5: send the version line and sender `hello`, then read
/// back `ok` (or `error`) and the terminating blank line, handing back the
/// pinned fingerprint and whatever bytes were buffered past the blank line.
async fn frame_handshake<S>(
    mut stream: S,
    relay_code: String,
    token: Option<String>,
    identity: Option<String>,
    keepalive_seconds: Option<u32>,
) -> Result<(String, Vec<u8>, S), SenderError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ssh_portal_codec::protocol::write_version_line(&mut stream).await?;
    let sender_meta = if keepalive_seconds.is_some() || identity.is_some() {
        Some(SenderMeta {
            keepalive: keepalive_seconds,
            identity: identity.map(|s| data_encoding::BASE64.encode(s.as_bytes())),
        })
    } else {
        None
    };
    ssh_portal_codec::protocol::write_frame(&mut stream, &Frame::hello_sender(relay_code, token, sender_meta)).await?;

    let mut reader = HandshakeReader::new(stream);
    let frame = reader.read_frame().await?;
    let fp = match frame {
        Frame::Ok { fp, .. } => fp,
        other => {
            warn!(?other, "unexpected frame from relay while pairing");
            return Err(SenderError::Protocol(ssh_portal_codec::ProtocolError::Relay(
                "expected ok".to_string(),
            )));
        }
    };
    reader.read_blank_line().await?;
    let (residual, stream) = reader.into_residual();
    Ok((fp, residual, stream))
}

/// spec §3 "sender status", §5 "the SSH client and connection objects are
/// held under a dedicated lock in the sender so teardown on keepalive
/// failure cannot race with `Create` on a forward". Owns the SSH handle,
/// the two forward registries, and whether the session is still alive.
pub struct SenderSession {
    handle: Mutex<Option<Handle<SenderHandler>>>,
    pub local_forwards: Arc<LocalForwardRegistry>,
    pub reverse_forwards: Arc<ReverseForwardRegistry>,
    alive: std::sync::atomic::AtomicBool,
}

impl SenderSession {
    pub fn new(handshake: SenderHandshake) -> Arc<Self> {
        Arc::new(Self {
            handle: Mutex::new(Some(handshake.handle)),
            local_forwards: LocalForwardRegistry::new(),
            reverse_forwards: handshake.reverse_forwards,
            alive: std::sync::atomic::AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::Acquire)
    }

    /// A cloned handle for registering forwards, or `None` once the session
    /// has been torn down by a failed keepalive.
    pub async fn handle(&self) -> Option<Handle<SenderHandler>> {
        self.handle.lock().await.clone()
    }

    /// spec §4.4 "Keepalive emitter": on failure, mark the session dead, drop
    /// the stored handle, and stop every local forward.
    async fn teardown(&self) {
        self.alive.store(false, std::sync::atomic::Ordering::Release);
        self.handle.lock().await.take();
        self.local_forwards.close_all().await;
        self.reverse_forwards.clear().await;
    }

    pub async fn create_local_forward(&self, listen_addr: &str, target_addr: &str) -> Result<LocalForwardId, SenderError> {
        let handle = self.handle().await.ok_or(SenderError::PeerGone)?;
        self.local_forwards.create(handle, listen_addr, target_addr).await
    }

    pub async fn start_reverse_forward(&self, bind_addr: &str, bind_port: u32, local_target: &str) -> Result<u32, SenderError> {
        let handle = self.handle().await.ok_or(SenderError::PeerGone)?;
        self.reverse_forwards.start(&handle, bind_addr, bind_port, local_target).await
    }

    pub async fn stop_reverse_forward(&self, bind_addr: &str, bind_port: u32) -> Result<(), SenderError> {
        let handle = self.handle().await.ok_or(SenderError::PeerGone)?;
        self.reverse_forwards.stop(&handle, bind_addr, bind_port).await
    }
}

/// Runs forever (until the session is torn down), issuing a
/// `keepalive@ssh-portal` global request every 2s and concluding the peer is
/// gone the first time one fails (spec §4.4 "Keepalive emitter").
pub async fn run_keepalive_emitter(session: Arc<SenderSession>) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(handle) = session.handle().await else {
            return;
        };
        if handle.global_request("keepalive@ssh-portal", Vec::new(), true).await.is_err() {
            warn!("keepalive failed, treating peer as gone");
            session.teardown().await;
            return;
        }
    }
}
