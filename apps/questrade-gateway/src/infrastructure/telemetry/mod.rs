//! Tracing Setup
//!
//! Structured logging via `tracing` with an `EnvFilter`-driven fmt layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard filter directives (e.g. `questrade_gateway=debug`)
//! - `GATEWAY_LOG_JSON`: set to "true" for JSON-formatted log lines
//!
//! # Usage
//!
//! ```ignore
//! use questrade_gateway::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("Gateway starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Telemetry configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let json = std::env::var("GATEWAY_LOG_JSON")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        Self { json }
    }
}

/// Initialize tracing with configuration from the environment.
pub fn init() {
    init_with_config(TelemetryConfig::from_env());
}

/// Initialize tracing with custom configuration.
#[allow(clippy::expect_used)]
pub fn init_with_config(config: TelemetryConfig) {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "questrade_gateway=info"
                .parse()
                .expect("static directive 'questrade_gateway=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        );

    if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_plain_text() {
        let config = TelemetryConfig::default();
        assert!(!config.json);
    }

    #[test]
    fn from_env_without_vars_is_default() {
        if std::env::var("GATEWAY_LOG_JSON").is_err() {
            assert!(!TelemetryConfig::from_env().json);
        }
    }
}
