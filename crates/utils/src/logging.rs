//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// initiate the global tracing subscriber
pub fn init(format: LogFormat) {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = layer().with_writer(std::io::stderr).with_target(true);

    match format {
        LogFormat::Text => registry().with(fmt_layer.with_filter(env_filter)).init(),
        LogFormat::Json => registry()
            .with(fmt_layer.json().with_filter(env_filter))
            .init(),
    }
}
