pub mod config;
pub mod error;
pub mod invite;
pub mod pairing;
mod reaper;
pub mod splice;
mod rate_limit;
mod run;

pub use config::RelayConfig;
pub use error::RelayError;
pub use pairing::RelayState;
pub use run::{run_relay, serve};
