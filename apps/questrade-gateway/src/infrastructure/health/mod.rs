//! Health Check Endpoint
//!
//! HTTP endpoint for health checks and stream-status reporting. Used by
//! container orchestrators and load balancers.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks stream state)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::{BroadcastHub, StreamStatus};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream connection state.
    pub stream: StreamInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming, or standing by while another instance streams.
    Healthy,
    /// Between connections (provisioning or backing off).
    Degraded,
    /// Shut down.
    Unhealthy,
}

/// Stream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connection state.
    pub state: String,
    /// Whether this instance currently holds the stream open.
    pub streaming: bool,
    /// Number of in-process quote subscribers.
    pub quote_subscribers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: Arc<BroadcastHub>,
    stream_status: RwLock<StreamStatus>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, hub: Arc<BroadcastHub>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
            stream_status: RwLock::new(StreamStatus::Standby),
        }
    }

    /// Keep `stream_status` current by following the hub's status channel.
    ///
    /// Runs until cancelled; intended to be spawned.
    pub async fn watch_status(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.hub.subscribe_status();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                status = rx.recv() => {
                    match status {
                        Ok(status) => *self.stream_status.write() = status,
                        // Lagged: resubscribe picks up from the current tail.
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    fn stream_status(&self) -> StreamStatus {
        *self.stream_status.read()
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // A standby instance is ready: it serves no quotes but is one poll away
    // from taking over the stream.
    match state.stream_status() {
        StreamStatus::Connected | StreamStatus::Standby => (StatusCode::OK, "READY"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY"),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream_status = state.stream_status();

    HealthResponse {
        status: determine_health_status(stream_status),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamInfo {
            state: status_string(stream_status),
            streaming: stream_status == StreamStatus::Connected,
            quote_subscribers: state.hub.quote_subscribers(),
        },
    }
}

fn status_string(status: StreamStatus) -> String {
    match status {
        StreamStatus::Standby => "standby",
        StreamStatus::Provisioning => "provisioning",
        StreamStatus::Connected => "connected",
        StreamStatus::Disconnected => "disconnected",
        StreamStatus::Stopped => "stopped",
    }
    .to_string()
}

const fn determine_health_status(status: StreamStatus) -> HealthStatus {
    match status {
        StreamStatus::Connected | StreamStatus::Standby => HealthStatus::Healthy,
        StreamStatus::Provisioning | StreamStatus::Disconnected => HealthStatus::Degraded,
        StreamStatus::Stopped => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "0.1.0-test".to_string(),
            Arc::new(BroadcastHub::default()),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn standby_counts_as_healthy() {
        assert_eq!(
            determine_health_status(StreamStatus::Standby),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(StreamStatus::Connected),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn reconnecting_is_degraded() {
        assert_eq!(
            determine_health_status(StreamStatus::Disconnected),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(StreamStatus::Provisioning),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn stopped_is_unhealthy() {
        assert_eq!(
            determine_health_status(StreamStatus::Stopped),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn watcher_tracks_hub_status() {
        let hub = Arc::new(BroadcastHub::default());
        let state = Arc::new(HealthServerState::new(
            "0.1.0-test".to_string(),
            Arc::clone(&hub),
        ));
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(Arc::clone(&state).watch_status(cancel.clone()));
        // Let the watcher subscribe before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        hub.publish_status(StreamStatus::Connected);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(state.stream_status(), StreamStatus::Connected);

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[test]
    fn health_response_shape() {
        let response = build_health_response(&state());
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.stream.state, "standby");
        assert!(!response.stream.streaming);
    }
}
