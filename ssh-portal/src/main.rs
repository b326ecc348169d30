use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

mod cli;
mod commands;
mod config;
mod logging;

use cli::{Cli, Command, ReceiverArgs};
use config::load_config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    let log_level = cli.log_level.as_deref().or(config.log.level.as_deref());
    if let Err(e) = logging::init_logging(log_level) {
        eprintln!("failed to initialize logging: {e:#}");
        std::process::exit(1);
    }

    // Process-wide cancellation (spec §5): ctrl_c cancels the token rather
    // than exiting immediately, so the relay/receiver can drain in flight
    // work before returning.
    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt, shutting down");
            ctrl_c_token.cancel();
        }
    });

    // No subcommand behaves as `receiver` (spec §6).
    let result = match cli.command {
        Some(Command::Relay(args)) => commands::relay::command(&args, &config, token).await,
        Some(Command::Receiver(args)) => commands::receiver::command(&args, &config, token).await,
        Some(Command::Sender(args)) => commands::sender::command(&args, &config).await,
        None => commands::receiver::command(&ReceiverArgs::default(), &config, token).await,
    };

    if let Err(e) = result {
        error!(error = %e, "exiting with error");
        std::process::exit(1);
    }
}
