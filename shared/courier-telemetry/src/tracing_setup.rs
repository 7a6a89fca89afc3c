//! Tracing setup for the gateway's channel-adapter binaries.
//!
//! One process hosts every channel adapter (spec §6), so every log
//! line and span this emits is tagged with the adapter/channel-type
//! pair responsible for it rather than just a service name — that's
//! what distinguishes a Telegram delivery failure from an SMS one in
//! a shared log stream.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Initializes the process-wide subscriber. `gateway_name` identifies
/// the binary (e.g. `courier-server`); individual log lines add their
/// own `channel_type`/`channel_uuid` fields as adapters act.
pub fn init_tracing(gateway_name: &str, config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Build subscriber based on JSON logging preference
    if config.json_logs {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;
    }

    tracing::info!(
        gateway = gateway_name,
        service = %config.service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "courier gateway tracing initialized"
    );

    Ok(())
}
