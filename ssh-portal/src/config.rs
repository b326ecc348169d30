//! YAML config loading (spec §6, §11): `config` crate, layered under CLI
//! flags and the `SSH_PORTAL_SENDER_CODE`/`SSH_PORTAL_LOG_LEVEL` env vars,
//! precedence flag > env > file > default.

use std::path::Path;

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

fn default_relay_port() -> u16 {
    4430
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfigFile {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfigFile {
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub interactive: bool,
    #[serde(rename = "receiver-token")]
    pub receiver_token: Option<String>,
    #[serde(rename = "sender-token")]
    pub sender_token: Option<String>,
}

impl Default for RelayConfigFile {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            interactive: true,
            receiver_token: None,
            sender_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReceiverConfigFile {
    pub relay: Option<String>,
    #[serde(rename = "relay-port")]
    pub relay_port: Option<u16>,
    pub token: Option<String>,
    pub interactive: Option<bool>,
    pub session: Option<bool>,
    pub logview: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ForwardDef {
    pub listen: String,
    pub target: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SenderProfileFile {
    pub name: String,
    pub relay: Option<String>,
    #[serde(rename = "relay-port")]
    pub relay_port: Option<u16>,
    pub token: Option<String>,
    pub interactive: Option<bool>,
    #[serde(with = "humantime_serde::option", default)]
    pub keepalive: Option<std::time::Duration>,
    pub identity: Option<String>,
    #[serde(default)]
    pub local: Vec<ForwardDef>,
    #[serde(default)]
    pub remote: Vec<ForwardDef>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SenderConfigFile {
    pub relay: Option<String>,
    #[serde(rename = "relay-port")]
    pub relay_port: Option<u16>,
    pub token: Option<String>,
    pub interactive: Option<bool>,
    #[serde(with = "humantime_serde::option", default)]
    pub keepalive: Option<std::time::Duration>,
    pub identity: Option<String>,
    pub code: Option<String>,
    #[serde(default)]
    pub profiles: Vec<SenderProfileFile>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfigFile,
    #[serde(default)]
    pub relay: RelayConfigFile,
    #[serde(default)]
    pub receiver: ReceiverConfigFile,
    #[serde(default)]
    pub sender: SenderConfigFile,
}

/// Loads `AppConfig` from an optional YAML file layered under the
/// `SSH_PORTAL_*` environment variables; missing file is not an error (every
/// field has a default), matching `warpgate`'s `config.rs` builder shape.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
    }
    builder = builder.add_source(Environment::with_prefix("SSH_PORTAL").separator("_"));
    let config = builder.build()?;
    config.try_deserialize().map_err(Into::into)
}
