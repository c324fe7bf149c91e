//! Global `tracing` subscriber setup for the embedding binary. The ingest pipeline
//! itself never calls `init` internally -- every long-lived thread just opens a
//! span and logs through `tracing` -- but the crate exposes this so the
//! out-of-scope server binary does not have to reimplement subscriber wiring.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err("invalid log format, expected \"compact\" or \"json\""),
        }
    }
}

/// Initializes the global subscriber once. Safe to call multiple times in tests;
/// later calls are ignored.
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer: Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let _ = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
