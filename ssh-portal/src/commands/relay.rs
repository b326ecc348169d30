//! `ssh-portal relay` (spec §6): binds the configured port and runs the
//! rendezvous relay until it exits (exit 1 on listen failure per spec §6).

use anyhow::{Context, Result};
use ssh_portal_common::Secret;
use ssh_portal_relay::RelayConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::RelayArgs;
use crate::config::AppConfig;

pub async fn command(args: &RelayArgs, config: &AppConfig, token: CancellationToken) -> Result<()> {
    let port = args.port.unwrap_or(config.relay.port);
    let receiver_token = args
        .receiver_token
        .clone()
        .or_else(|| config.relay.receiver_token.clone())
        .map(Secret::new);
    let sender_token = args
        .sender_token
        .clone()
        .or_else(|| config.relay.sender_token.clone())
        .map(Secret::new);

    let addr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid relay bind address")?;

    info!(%port, "starting relay");
    ssh_portal_relay::run_relay(
        addr,
        RelayConfig {
            receiver_token,
            sender_token,
        },
        token,
    )
    .await
    .context("relay listen failed")
}
