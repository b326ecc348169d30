//! clap CLI surface (spec §6): `relay`/`receiver`/`sender` subcommands plus
//! the shared `--config`/`--log-level` globals.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ssh-portal", version, about = "SSH rendezvous relay, receiver, and sender")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to a YAML config file (spec §6, §11).
    #[arg(long, global = true, env = "SSH_PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides RUST_LOG when unset (spec §6, §11).
    #[arg(long, global = true, env = "SSH_PORTAL_LOG_LEVEL")]
    pub log_level: Option<String>,

    // When no subcommand is given the root command behaves as `receiver`
    // (spec §6) and also exposes these two flags.
    #[arg(long, global = true)]
    pub logview: bool,

    #[arg(long, global = true)]
    pub identity: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the rendezvous relay.
    Relay(RelayArgs),
    /// Run the receiver (SSH server role).
    Receiver(ReceiverArgs),
    /// Run the sender (SSH client role).
    Sender(SenderArgs),
}

#[derive(Parser, Debug, Default)]
pub struct RelayArgs {
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub interactive: Option<bool>,
    #[arg(long)]
    pub receiver_token: Option<String>,
    #[arg(long)]
    pub sender_token: Option<String>,
}

#[derive(Parser, Debug, Default)]
pub struct ReceiverArgs {
    #[arg(long)]
    pub relay: Option<String>,
    #[arg(long)]
    pub relay_port: Option<u16>,
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub interactive: Option<bool>,
    #[arg(long)]
    pub session: Option<bool>,
}

#[derive(Parser, Debug, Default)]
pub struct SenderArgs {
    /// The user code (flag, `SSH_PORTAL_SENDER_CODE` env, or config).
    #[arg(short = 'c', long, env = "SSH_PORTAL_SENDER_CODE")]
    pub code: Option<String>,
    #[arg(long)]
    pub relay: Option<String>,
    #[arg(long)]
    pub relay_port: Option<u16>,
    #[arg(long)]
    pub interactive: Option<bool>,
    #[arg(long)]
    pub keepalive: Option<String>,
    #[arg(long)]
    pub identity: Option<String>,
    #[arg(long)]
    pub profile: Option<String>,
    #[arg(long)]
    pub menu: Option<bool>,
}
