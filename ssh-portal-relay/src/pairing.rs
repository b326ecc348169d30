//! Connection dispatch and the sender pairing algorithm (spec §4.2).

use std::net::SocketAddr;
use std::sync::Arc;

use ssh_portal_codec::protocol::{write_blank_line, write_frame, Frame, HandshakeReader, Role};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::invite::{InviteRegistry, PairedHandoff};
use crate::rate_limit::RateLimiter;
use crate::splice::{run_splice, SpliceRegistry};

pub struct RelayState {
    pub invites: Mutex<InviteRegistry>,
    pub splices: SpliceRegistry,
    pub rate_limiter: RateLimiter,
    pub config: RelayConfig,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            invites: Mutex::new(InviteRegistry::new()),
            splices: SpliceRegistry::new(),
            rate_limiter: RateLimiter::new(),
            config,
        })
    }
}

async fn send_error<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, err: &RelayError) {
    let _ = write_frame(
        w,
        &Frame::Error {
            error: err.wire_code().to_string(),
        },
    )
    .await;
}

/// Handles one freshly accepted TCP connection end to end: reads the version
/// line and first frame, then dispatches by role.
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<RelayState>) {
    let span = info_span!("relay_connection", %peer_addr);
    async move {
        let mut reader = HandshakeReader::new(stream);
        if let Err(e) = reader.read_version_line().await {
            warn!(error = %e, "bad version line");
            return;
        }
        let frame = match reader.read_frame().await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "malformed first frame");
                return;
            }
        };

        match frame {
            Frame::Hello { role: Role::Receiver, receiver_fp: Some(fp), ttl_seconds, token, .. } => {
                if !state.config.receiver_token_ok(&token) {
                    let (_, mut stream) = reader.into_residual();
                    send_error(&mut stream, &RelayError::InvalidToken).await;
                    return;
                }
                handle_receiver(reader, fp, ttl_seconds, state).await;
            }
            Frame::Hello { role: Role::Sender, code: Some(code), token, sender, .. } => {
                handle_sender(reader, peer_addr, code, token, sender, state).await;
            }
            Frame::Await { rid } => {
                handle_receiver_reattach(reader, rid, state).await;
            }
            _ => {
                let (_, mut stream) = reader.into_residual();
                send_error(&mut stream, &RelayError::BadSide).await;
            }
        }
    }
    .instrument(span)
    .await;
}

async fn handle_receiver(
    reader: HandshakeReader<TcpStream>,
    receiver_fp: String,
    ttl_seconds: Option<u32>,
    state: Arc<RelayState>,
) {
    let (residual, mut stream) = reader.into_residual();

    let (rid, code, exp) = {
        let mut invites = state.invites.lock().await;
        invites.mint(receiver_fp, ttl_seconds)
    };
    info!(%rid, "minted invite");

    if write_frame(
        &mut stream,
        &Frame::HelloOk {
            code: code.clone(),
            rid: rid.clone(),
            exp,
        },
    )
    .await
    .is_err()
    {
        state.invites.lock().await.delete(&rid, "receiver-write-failed");
        return;
    }

    await_pairing_and_splice(rid, residual, stream, state).await;
}

async fn handle_receiver_reattach(reader: HandshakeReader<TcpStream>, rid: String, state: Arc<RelayState>) {
    let (residual, stream) = reader.into_residual();
    await_pairing_and_splice(rid, residual, stream, state).await;
}

/// Shared tail for both the initial `hello` path and the `await` re-attach
/// path: register this socket as the invite's receiver connection, block
/// until a sender pairs, reply `ready`, then splice.
async fn await_pairing_and_splice(
    rid: String,
    residual: Vec<u8>,
    mut stream: TcpStream,
    state: Arc<RelayState>,
) {
    let (tx, mut rx) = oneshot::channel();
    {
        let mut invites = state.invites.lock().await;
        if let Err(e) = invites.attach(&rid, tx) {
            send_error(&mut stream, &e).await;
            return;
        }
    }

    // Race pairing against the socket dying while we wait: the receiver
    // sends nothing more until `ready`, so any readability before that means
    // the peer closed (or violated framing). Detach rather than delete so a
    // later `await` on the same RID can re-attach (spec §4.1 "await").
    let handoff = loop {
        tokio::select! {
            res = &mut rx => {
                break match res {
                    Ok(h) => h,
                    Err(_) => return, // invite reaped or sender-side failure before pairing
                };
            }
            _ = stream.readable() => {
                let mut probe = [0u8; 1];
                match stream.try_read(&mut probe) {
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    _ => {
                        state.invites.lock().await.detach(&rid);
                        return;
                    }
                }
            }
        }
    };

    let ready = Frame::Ready {
        sender_addr: handoff.sender_addr.to_string(),
        fp: handoff.receiver_fp.clone(),
        exp: handoff.exp,
        alg: handoff.alg.clone(),
        sender: handoff.sender.clone(),
    };
    if write_frame(&mut stream, &ready).await.is_err() {
        return;
    }

    let receiver_addr = stream.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
    let sender_stream = ssh_portal_codec::protocol::PrefixedStream::new(handoff.sender_residual, handoff.sender_stream);
    let receiver_stream = ssh_portal_codec::protocol::PrefixedStream::new(residual, stream);

    let splice = state
        .splices
        .register(
            handoff.code,
            rid,
            handoff.receiver_fp,
            handoff.sender_addr,
            receiver_addr,
        )
        .await;
    run_splice(&state.splices, splice, receiver_stream, sender_stream).await;
}

async fn handle_sender(
    reader: HandshakeReader<TcpStream>,
    peer_addr: SocketAddr,
    code: String,
    token: Option<String>,
    sender_meta: Option<ssh_portal_codec::protocol::SenderMeta>,
    state: Arc<RelayState>,
) {
    let ip = peer_addr.ip();
    state.rate_limiter.maybe_backoff(ip).await;

    let (residual, mut stream) = reader.into_residual();

    if !state.config.sender_token_ok(&token) {
        state.rate_limiter.record_failure(ip).await;
        send_error(&mut stream, &RelayError::InvalidToken).await;
        return;
    }

    // The whole lookup-validate-take-delete sequence runs under one lock
    // acquisition (spec §5: "pairing is serialized at the point of registry
    // lookup-and-delete"). Taking the attached reply channel and deleting
    // the invite together is what actually decides the winner: of two
    // concurrent senders racing the same code, only the one whose critical
    // section runs first can still find the invite attached, so the other
    // falls straight into the `not-ready` arm below. `sentOK` is still
    // tracked on the invite per spec §3 but the race itself is resolved
    // here, not by that flag.
    let won = {
        let mut invites = state.invites.lock().await;
        match invites.get_by_code(&code) {
            Some(inv) if inv.is_attached() && inv.expires_at > std::time::SystemTime::now() => {
                let rid = inv.rid.clone();
                let receiver_fp = inv.receiver_fp.clone();
                let exp = inv
                    .expires_at
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                invites.set_sender_meta(&rid, sender_meta.clone());
                invites.try_mark_sent_ok(&rid);
                let reply_tx = invites.take_attached(&rid);
                invites.delete(&rid, "paired");
                reply_tx.map(|tx| (rid, receiver_fp, exp, tx))
            }
            _ => None,
        }
    };

    let Some((_rid, receiver_fp, exp, reply_tx)) = won else {
        state.rate_limiter.record_failure(ip).await;
        send_error(&mut stream, &RelayError::NotReady).await;
        return;
    };

    state.rate_limiter.reset(ip).await;

    let ok = Frame::Ok {
        fp: receiver_fp.clone(),
        exp,
        alg: String::new(),
    };
    if write_frame(&mut stream, &ok).await.is_err() || write_blank_line(&mut stream).await.is_err() {
        return;
    }

    let _ = reply_tx.send(PairedHandoff {
        code,
        receiver_fp,
        sender_addr: peer_addr,
        exp,
        alg: None,
        sender: sender_meta,
        sender_stream: stream,
        sender_residual: residual,
    });
}
