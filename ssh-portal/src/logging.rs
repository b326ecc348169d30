//! `tracing` + `tracing-subscriber` setup (spec §11): CLI `--log-level`
//! seeds `RUST_LOG` when unset; a compact ANSI layer when attached to a
//! terminal, a plain layer otherwise — following `warpgate`'s `logging.rs`.

use anyhow::Result;
use time::{format_description, UtcOffset};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_logging(log_level: Option<&str>) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: called once at startup before any other thread is spawned.
        unsafe { std::env::set_var("RUST_LOG", log_level.unwrap_or("info")) };
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let env_filter = EnvFilter::from_default_env();
    let interactive = console::user_attended();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(interactive)
        .with_target(!interactive)
        .with_timer(OffsetTime::new(
            offset,
            format_description::parse("[hour]:[minute]:[second]").unwrap_or_default(),
        ));

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    Ok(())
}
