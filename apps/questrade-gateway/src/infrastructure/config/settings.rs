//! Gateway Configuration Settings
//!
//! Configuration for the gateway, loaded from environment variables. Policy
//! values all have production defaults; only the store endpoints and the
//! bootstrap credential are deployment-specific.

use std::time::Duration;

use crate::infrastructure::questrade::auth::AuthConfig;
use crate::infrastructure::questrade::elector::ElectionConfig;
use crate::infrastructure::questrade::http::RateLimitConfig;
use crate::infrastructure::questrade::reconnect::BackoffConfig;
use crate::infrastructure::questrade::stream::StreamConfig;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Unique identifier for this instance; the owner marker for all locks.
    pub instance_id: String,
    /// Redis connection URL for the shared coordination store.
    pub redis_url: String,
    /// Outbound HTTP request timeout.
    pub http_timeout: Duration,
    /// Broadcast channel capacity.
    pub broadcast_capacity: usize,
    /// Server port settings.
    pub server: ServerSettings,
    /// Credential rotation policy.
    pub auth: AuthConfig,
    /// Stream ownership election policy.
    pub election: ElectionConfig,
    /// Stream connection policy.
    pub stream: StreamConfig,
    /// REST rate-limit policy.
    pub rate_limit: RateLimitConfig,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let instance_id = std::env::var("GATEWAY_INSTANCE_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let auth_defaults = AuthConfig::default();
        let auth = AuthConfig {
            token_url: parse_env_string("QUESTRADE_TOKEN_URL", &auth_defaults.token_url),
            bootstrap_refresh_token: std::env::var("QUESTRADE_REFRESH_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            rotation_lock_ttl: parse_env_duration_secs(
                "GATEWAY_ROTATION_LOCK_TTL_SECS",
                auth_defaults.rotation_lock_ttl,
            ),
            poll_interval: parse_env_duration_millis(
                "GATEWAY_ROTATION_POLL_INTERVAL_MS",
                auth_defaults.poll_interval,
            ),
            poll_attempts: parse_env_u32(
                "GATEWAY_ROTATION_POLL_ATTEMPTS",
                auth_defaults.poll_attempts,
            ),
            ..auth_defaults
        };

        let election_defaults = ElectionConfig::default();
        let election = ElectionConfig {
            lock_ttl: parse_env_duration_secs(
                "GATEWAY_OWNERSHIP_TTL_SECS",
                election_defaults.lock_ttl,
            ),
            renew_interval: parse_env_duration_secs(
                "GATEWAY_OWNERSHIP_RENEW_SECS",
                election_defaults.renew_interval,
            ),
            standby_poll_interval: parse_env_duration_secs(
                "GATEWAY_STANDBY_POLL_SECS",
                election_defaults.standby_poll_interval,
            ),
            ..election_defaults
        };

        let backoff_defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            initial_delay: parse_env_duration_millis(
                "GATEWAY_RECONNECT_DELAY_INITIAL_MS",
                backoff_defaults.initial_delay,
            ),
            max_delay: parse_env_duration_secs(
                "GATEWAY_RECONNECT_DELAY_MAX_SECS",
                backoff_defaults.max_delay,
            ),
            ..backoff_defaults
        };

        let stream_defaults = StreamConfig::default();
        let stream = StreamConfig {
            resync_interval: parse_env_duration_secs(
                "GATEWAY_RESYNC_INTERVAL_SECS",
                stream_defaults.resync_interval,
            ),
            fallback_instrument_id: parse_env_u64(
                "GATEWAY_FALLBACK_INSTRUMENT_ID",
                stream_defaults.fallback_instrument_id,
            ),
            backoff,
        };

        Self {
            instance_id,
            redis_url: parse_env_string("GATEWAY_REDIS_URL", "redis://127.0.0.1:6379"),
            http_timeout: parse_env_duration_secs(
                "GATEWAY_HTTP_TIMEOUT_SECS",
                Duration::from_secs(30),
            ),
            broadcast_capacity: parse_env_usize("GATEWAY_BROADCAST_CAPACITY", 1024),
            server: ServerSettings {
                health_port: parse_env_u16(
                    "GATEWAY_HEALTH_PORT",
                    ServerSettings::default().health_port,
                ),
            },
            auth,
            election,
            stream,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn parse_env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = GatewayConfig::from_env();
        assert_eq!(config.election.lock_ttl, Duration::from_secs(15));
        assert_eq!(config.election.renew_interval, Duration::from_secs(10));
        assert_eq!(config.auth.rotation_lock_ttl, Duration::from_secs(30));
        assert_eq!(config.auth.poll_attempts, 20);
        assert_eq!(config.stream.resync_interval, Duration::from_secs(60));
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn instance_id_is_generated_when_unset() {
        let a = GatewayConfig::from_env();
        let b = GatewayConfig::from_env();
        assert!(!a.instance_id.is_empty());
        // Freshly generated IDs must differ between instances.
        if std::env::var("GATEWAY_INSTANCE_ID").is_err() {
            assert_ne!(a.instance_id, b.instance_id);
        }
    }

    #[test]
    fn parse_helpers_fall_back_on_garbage() {
        assert_eq!(parse_env_u16("GATEWAY_TEST_UNSET_PORT", 1234), 1234);
        assert_eq!(
            parse_env_duration_secs("GATEWAY_TEST_UNSET_SECS", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
