//! The SSH overlay shared by the receiver and sender roles: ephemeral host
//! keys and fingerprinting, the channel-operation payload types, and
//! bidirectional TCP bridging, plus the two role-specific submodules.

pub mod bridge;
pub mod channel;
pub mod client;
pub mod error;
pub mod keys;
pub mod server;

pub use error::SshPortalError;
