//! Questrade Gateway Binary
//!
//! Starts the brokerage connectivity gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin questrade-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required (first run)
//! - `QUESTRADE_REFRESH_TOKEN`: bootstrap refresh token; after the first
//!   rotation the settings file holds the current one
//!
//! ## Optional
//! - `GATEWAY_REDIS_URL`: shared coordination store (default: redis://127.0.0.1:6379)
//! - `GATEWAY_INSTANCE_ID`: instance identity (default: random UUID)
//! - `GATEWAY_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `GATEWAY_SETTINGS_FILE`: durable settings path (default: ./gateway-settings.json)
//! - `GATEWAY_FALLBACK_INSTRUMENT_ID`: keep-alive instrument (default: 8049)
//! - `RUST_LOG`: log filter (default: info)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use questrade_gateway::application::ports::{
    CoordinationStore, OpenPosition, PositionStore, SettingsStore, StoreError,
};
use questrade_gateway::infrastructure::broadcast::BroadcastHub;
use questrade_gateway::infrastructure::coordination::RedisCoordinationStore;
use questrade_gateway::infrastructure::health::{HealthServer, HealthServerState};
use questrade_gateway::infrastructure::questrade::{
    CredentialManager, RateLimitedClient, StreamLeaderElector, StreamManager, SymbolResolver,
    SymbolResolverConfig,
};
use questrade_gateway::infrastructure::telemetry;
use questrade_gateway::GatewayConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();
    telemetry::init();

    tracing::info!("Starting Questrade Gateway");

    let config = GatewayConfig::from_env();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let coordination: Arc<dyn CoordinationStore> =
        Arc::new(RedisCoordinationStore::connect(&config.redis_url).await?);

    let settings_path = std::env::var("GATEWAY_SETTINGS_FILE")
        .map_or_else(|_| PathBuf::from("gateway-settings.json"), PathBuf::from);
    let settings: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::load(settings_path)?);

    let http = RateLimitedClient::new(config.http_timeout, config.rate_limit.clone())?;

    let credentials = Arc::new(CredentialManager::new(
        config.auth.clone(),
        http.clone(),
        Arc::clone(&settings),
        Arc::clone(&coordination),
        &config.instance_id,
    ));

    let resolver = Arc::new(SymbolResolver::new(
        http.clone(),
        SymbolResolverConfig::default(),
    ));

    // Deployments embed the library with a real position store; the
    // standalone binary streams the fallback instrument only.
    let positions: Arc<dyn PositionStore> = Arc::new(EmptyPositionStore);

    let elector = StreamLeaderElector::new(
        Arc::clone(&coordination),
        config.election.clone(),
        &config.instance_id,
    );

    let hub = Arc::new(BroadcastHub::new(config.broadcast_capacity));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&hub),
    ));
    tokio::spawn(Arc::clone(&health_state).watch_status(shutdown_token.clone()));

    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let stream_manager = Arc::new(StreamManager::new(
        config.stream.clone(),
        http,
        credentials,
        resolver,
        positions,
        elector,
        Arc::clone(&hub),
        shutdown_token.clone(),
    ));
    let stream_handle = tokio::spawn(stream_manager.run());

    tracing::info!("Gateway ready");

    await_shutdown(shutdown_token).await;

    if let Err(e) = stream_handle.await? {
        tracing::error!(error = %e, "Stream manager exited with error");
    }

    tracing::info!("Gateway stopped");
    Ok(())
}

// =============================================================================
// Binary-local store adapters
// =============================================================================

/// Durable settings in a local JSON file.
///
/// Durability matters here: the rotated refresh token must survive a process
/// restart, or the next rotation presents a consumed token.
struct FileSettingsStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileSettingsStore {
    fn load(path: PathBuf) -> Result<Self, StoreError> {
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(StoreError::from_source)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::from_source(e)),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(values).map_err(StoreError::from_source)?;
        // Write-then-rename so a crash mid-write cannot truncate the file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(StoreError::from_source)?;
        std::fs::rename(&tmp, &self.path).map_err(StoreError::from_source)
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let snapshot = {
            let mut values = self.values.lock();
            values.insert(key.to_string(), value.to_string());
            values.clone()
        };
        self.persist(&snapshot)
    }
}

/// Position store with no positions; the stream carries the fallback
/// instrument only.
struct EmptyPositionStore;

#[async_trait]
impl PositionStore for EmptyPositionStore {
    async fn list_open_positions(&self) -> Result<Vec<OpenPosition>, StoreError> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Startup helpers
// =============================================================================

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        instance_id = %config.instance_id,
        health_port = config.server.health_port,
        redis_url = %config.redis_url,
        "Configuration loaded"
    );
    tracing::debug!(
        ownership_ttl_secs = config.election.lock_ttl.as_secs(),
        renew_secs = config.election.renew_interval.as_secs(),
        resync_secs = config.stream.resync_interval.as_secs(),
        rotation_lock_ttl_secs = config.auth.rotation_lock_ttl.as_secs(),
        "Coordination policy"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
