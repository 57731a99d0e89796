//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Builds the event filter. `RUST_LOG` wins over `default_level`.
#[must_use]
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sensor_hub={default_level},tower_http={default_level}"
        ))
    })
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = env_filter(default_level);
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok(),
        LogFormat::Console => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .ok(),
    };
}
