//! `ssh-portal sender` (spec §4.4): resolve the profile, run the relay
//! handshake, then bring up every configured local/remote forward and keep
//! the keepalive emitter running until the peer is gone.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use ssh_portal_ssh::client::{connect_and_handshake, run_keepalive_emitter, SenderSession};
use tracing::info;

use crate::cli::SenderArgs;
use crate::config::{AppConfig, ForwardDef, SenderProfileFile};

struct Resolved {
    relay: String,
    relay_port: u16,
    token: Option<String>,
    keepalive: Option<Duration>,
    identity: Option<String>,
    local: Vec<ForwardDef>,
    remote: Vec<ForwardDef>,
}

fn resolve(args: &SenderArgs, config: &AppConfig) -> Result<Resolved> {
    let profile: Option<&SenderProfileFile> = match &args.profile {
        Some(name) => Some(
            config
                .sender
                .profiles
                .iter()
                .find(|p| &p.name == name)
                .with_context(|| format!("no sender profile named {name:?}"))?,
        ),
        None => None,
    };

    let relay = args
        .relay
        .clone()
        .or_else(|| profile.and_then(|p| p.relay.clone()))
        .or_else(|| config.sender.relay.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let relay_port = args
        .relay_port
        .or_else(|| profile.and_then(|p| p.relay_port))
        .or(config.sender.relay_port)
        .unwrap_or(4430);
    let token = args
        .token_placeholder()
        .or_else(|| profile.and_then(|p| p.token.clone()))
        .or_else(|| config.sender.token.clone());
    let keepalive = args
        .keepalive_duration()?
        .or_else(|| profile.and_then(|p| p.keepalive))
        .or(config.sender.keepalive);
    let identity = args
        .identity
        .clone()
        .or_else(|| profile.and_then(|p| p.identity.clone()))
        .or_else(|| config.sender.identity.clone());

    let local = profile.map(|p| p.local.clone()).unwrap_or_default();
    let remote = profile.map(|p| p.remote.clone()).unwrap_or_default();

    Ok(Resolved {
        relay,
        relay_port,
        token,
        keepalive,
        identity,
        local,
        remote,
    })
}

impl SenderArgs {
    // `--token` is not part of the sender's CLI surface in spec §6, only
    // config/profile; kept as a seam so a future CLI flag slots in cleanly.
    fn token_placeholder(&self) -> Option<String> {
        None
    }

    fn keepalive_duration(&self) -> Result<Option<Duration>> {
        self.keepalive
            .as_deref()
            .map(|s| humantime::parse_duration(s).context("invalid --keepalive duration"))
            .transpose()
    }
}

pub async fn command(args: &SenderArgs, config: &AppConfig) -> Result<()> {
    let code = args
        .code
        .clone()
        .or_else(|| config.sender.code.clone())
        .context("no user code given (use --code, SSH_PORTAL_SENDER_CODE, or config)")?;

    let resolved = resolve(args, config)?;
    let relay_addr = format!("{}:{}", resolved.relay, resolved.relay_port);
    let keepalive_seconds = resolved.keepalive.map(|d| d.as_secs() as u32);

    info!(%relay_addr, "connecting to relay");
    let handshake = connect_and_handshake(&relay_addr, &code, keepalive_seconds, resolved.identity, resolved.token)
        .await
        .context("relay handshake failed")?;
    info!(fp = %handshake.server_fp, "paired; ssh session established");

    let session = SenderSession::new(handshake);
    tokio::spawn(run_keepalive_emitter(session.clone()));

    for fwd in &resolved.local {
        session
            .create_local_forward(&fwd.listen, &fwd.target)
            .await
            .with_context(|| format!("local forward {} -> {} failed", fwd.listen, fwd.target))?;
        info!(listen = %fwd.listen, target = %fwd.target, "local forward active");
    }

    for fwd in &resolved.remote {
        let bind: std::net::SocketAddr = fwd.listen.parse().context("invalid remote forward bind address")?;
        let actual_port = session
            .start_reverse_forward(&bind.ip().to_string(), bind.port() as u32, &fwd.target)
            .await
            .with_context(|| format!("remote forward {} -> {} failed", fwd.listen, fwd.target))?;
        info!(bind = %bind.ip(), port = actual_port, target = %fwd.target, "remote forward active");
    }

    while session.is_alive() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    bail!("peer is gone (keepalive failed)")
}
