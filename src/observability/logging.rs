//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level so operators can raise verbosity without editing the
//! config file.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingConfig};
use crate::core::error::{GatewayError, GatewayResult};

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> GatewayResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| GatewayError::config(format!("Invalid logging.level '{}': {}", config.level, e))),
    }
}

/// Initialize the tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let filter = env_filter(config)?;

    let initialized = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    // Tests and embedders may have installed a subscriber already
    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}
