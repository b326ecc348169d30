//! `ssh-portal receiver` (spec §4.3): the restart loop — mint an invite,
//! print the user code, wait for `ready`, run one SSH server session, then
//! loop back with a cosmetic backoff distinguishing clean disconnects from
//! errors.

use std::time::Duration;

use anyhow::{Context, Result};
use data_encoding::BASE64;
use ssh_portal_codec::protocol::{write_frame, write_version_line, Frame, HandshakeReader, PrefixedStream};
use ssh_portal_codec::generate_user_code;
use ssh_portal_common::Secret;
use ssh_portal_ssh::keys::{fingerprint, generate_ephemeral_host_key};
use ssh_portal_ssh::server::{keepalive_timeout_from_sender, run_receiver_session, ReceiverSessionConfig, SessionEnded};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cli::ReceiverArgs;
use crate::config::AppConfig;

pub async fn command(args: &ReceiverArgs, config: &AppConfig, token: CancellationToken) -> Result<()> {
    let relay_host = args.relay.clone().or_else(|| config.receiver.relay.clone()).unwrap_or_else(|| "127.0.0.1".to_string());
    let relay_port = args.relay_port.or(config.receiver.relay_port).unwrap_or(4430);
    let relay_addr = format!("{relay_host}:{relay_port}");
    let invite_token = args.token.clone().or_else(|| config.receiver.token.clone());
    let session_enabled = args.session.or(config.receiver.session).unwrap_or(false);

    // The loop exits only on external cancellation (spec §5).
    while !token.is_cancelled() {
        let ended = tokio::select! {
            _ = token.cancelled() => break,
            ended = run_one_session(&relay_addr, invite_token.clone(), session_enabled) => ended,
        };
        match ended {
            Ok(SessionEnded::PeerDisconnected) => {
                info!("session ended, restarting");
                sleep_or_cancel(Duration::from_secs(1), &token).await;
            }
            Ok(SessionEnded::Error(e)) => {
                warn!(error = %e, "session ended with error, restarting");
                sleep_or_cancel(Duration::from_secs(2), &token).await;
            }
            Err(e) => {
                error!(error = %e, "failed to mint invite, retrying");
                sleep_or_cancel(Duration::from_secs(2), &token).await;
            }
        }
    }
    Ok(())
}

async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

async fn run_one_session(relay_addr: &str, token: Option<String>, session_enabled: bool) -> Result<SessionEnded> {
    let host_key = generate_ephemeral_host_key().context("generating ephemeral host key")?;
    let receiver_fp = fingerprint(&host_key.public_key());

    let mut tcp = TcpStream::connect(relay_addr).await.context("connecting to relay")?;
    write_version_line(&mut tcp).await?;
    write_frame(&mut tcp, &Frame::hello_receiver(receiver_fp.clone(), None, token)).await?;

    let mut reader = HandshakeReader::new(tcp);
    let (code, rid) = match reader.read_frame().await? {
        Frame::HelloOk { code, rid, .. } => (code, rid),
        other => anyhow::bail!("unexpected frame from relay: {other:?}"),
    };

    let receiver_code = ssh_portal_codec::generate_receiver_code();
    let (user_code, full_b64) = generate_user_code(&code, &receiver_code)?;

    info!(%rid, %user_code, "invite minted, waiting for a sender");
    if console::user_attended() {
        println!("Share this code with the sender: {user_code}");
        println!("Rendezvous id: {rid}");
    }

    let span = info_span!("receiver_session", %rid);
    async move {
        let (sender_addr, sender_meta) = match reader.read_frame().await? {
            Frame::Ready { sender_addr, sender, .. } => (sender_addr, sender),
            other => anyhow::bail!("unexpected frame from relay: {other:?}"),
        };
        let sender_addr = sender_addr.parse().context("relay sent an invalid sender address")?;

        if let Some(identity) = sender_meta.as_ref().and_then(|s| s.identity.as_ref()) {
            match BASE64.decode(identity.as_bytes()) {
                Ok(bytes) => info!(identity = %String::from_utf8_lossy(&bytes), "sender identity"),
                Err(e) => warn!(error = %e, raw = %identity, "sender identity was not valid base64"),
            }
        }

        let keepalive_timeout = keepalive_timeout_from_sender(sender_meta.as_ref().and_then(|s| s.keepalive));

        let (residual, tcp) = reader.into_residual();
        let stream = PrefixedStream::new(residual, tcp);

        let ended = run_receiver_session(
            stream,
            host_key,
            code,
            Secret::new(full_b64),
            sender_addr,
            keepalive_timeout,
            ReceiverSessionConfig { session_enabled },
        )
        .await;
        Ok(ended)
    }
    .instrument(span)
    .await
}
