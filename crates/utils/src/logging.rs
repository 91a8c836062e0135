//! provides logging helpers

use std::io::IsTerminal;

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable consulted for log directives before `RUST_LOG`.
pub const LOG_ENV: &str = "GPU_INVENTORY_LOG";

/// initiate the global tracing subscriber, logging to stderr so stdout stays
/// free for command output
pub fn init() {
    let env_var = if std::env::var_os(LOG_ENV).is_some() {
        LOG_ENV
    } else {
        filter::EnvFilter::DEFAULT_ENV
    };

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .with_env_var(env_var)
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .with_filter(env_filter);

    if let Err(e) = registry().with(fmt_layer).try_init() {
        eprintln!("tracing subscriber already installed: {e}");
    }
}
