//! Quote Stream Manager
//!
//! Owns the full lifecycle of the single cluster-wide quote stream:
//! ownership election, subscription provisioning, socket connection,
//! periodic ownership renewal and subscription resync, and reconnection
//! with exponential backoff.
//!
//! # Lifecycle
//!
//! ```text
//! Standby -> Provisioning -> Connected -> Disconnected -> (backoff) -> ...
//!    ^                                         |
//!    +--------- ownership released ------------+
//! ```
//!
//! Only the instance holding the stream-ownership lock connects; everyone
//! else polls in standby. On any connection failure ownership is released
//! immediately so a healthy standby can take over while this instance backs
//! off.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::auth::{Credential, CredentialError, CredentialManager};
use super::elector::StreamLeaderElector;
use super::http::{ApiError, RateLimitedClient};
use super::messages::{StreamFrame, StreamPortResponse};
use super::reconnect::{BackoffConfig, ReconnectBackoff};
use super::symbols::{ResolveError, SymbolResolver};
use crate::application::ports::{PositionStore, StoreError};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::broadcast::{BroadcastHub, StreamStatus};

// =============================================================================
// Errors
// =============================================================================

/// Errors from the stream manager.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Credential acquisition or rotation failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// An external store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Symbol resolution failed outright.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Stream-port allocation failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket closed from the far side.
    #[error("stream connection closed")]
    ConnectionClosed,

    /// Ownership renewal failed; another instance may own the stream.
    #[error("stream ownership lost")]
    OwnershipLost,

    /// The provider invalidated the access token mid-stream.
    #[error("access token invalidated by provider")]
    TokenInvalid,
}

// =============================================================================
// Configuration
// =============================================================================

/// Stream manager policy.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Interval between full subscription resyncs.
    pub resync_interval: Duration,
    /// Instrument ID subscribed when no open positions resolve, keeping the
    /// socket alive on provider-side heartbeats.
    pub fallback_instrument_id: u64,
    /// Reconnect backoff policy.
    pub backoff: BackoffConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
            // AAPL; any liquid instrument works.
            fallback_instrument_id: 8049,
            backoff: BackoffConfig::default(),
        }
    }
}

// =============================================================================
// Stream Manager
// =============================================================================

/// Runs the stream lifecycle for this instance.
pub struct StreamManager {
    config: StreamConfig,
    http: RateLimitedClient,
    credentials: Arc<CredentialManager>,
    resolver: Arc<SymbolResolver>,
    positions: Arc<dyn PositionStore>,
    elector: StreamLeaderElector,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
    requested: RwLock<BTreeSet<u64>>,
}

impl StreamManager {
    /// Create a stream manager.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamConfig,
        http: RateLimitedClient,
        credentials: Arc<CredentialManager>,
        resolver: Arc<SymbolResolver>,
        positions: Arc<dyn PositionStore>,
        elector: StreamLeaderElector,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            http,
            credentials,
            resolver,
            positions,
            elector,
            hub,
            cancel,
            requested: RwLock::new(BTreeSet::new()),
        }
    }

    /// Pin an instrument ID into every future subscription, independent of
    /// open positions. Takes effect on the next resync or reconnect.
    pub fn request_id(&self, id: u64) {
        self.requested.write().insert(id);
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Only the initial credential acquisition is fatal: without a working
    /// credential the instance cannot ever serve, and failing fast surfaces
    /// a misconfigured bootstrap token at startup. Everything after that is
    /// retried forever.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamError> {
        self.credentials.valid_credential().await?;

        let mut backoff = ReconnectBackoff::new(self.config.backoff.clone());
        let standby_poll = self.elector.config().standby_poll_interval;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.elector.try_acquire().await.unwrap_or(false) {
                self.hub.publish_status(StreamStatus::Standby);
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(standby_poll) => continue,
                }
            }

            self.hub.publish_status(StreamStatus::Provisioning);

            match self.provision_and_run(&mut backoff).await {
                Ok(()) => break,
                Err(StreamError::TokenInvalid) => {
                    // The dead token was already rotated past; reconnect
                    // without backoff since the failure was not connectivity.
                    self.hub.publish_status(StreamStatus::Disconnected);
                    self.release_ownership().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stream connection failed");
                    self.hub.publish_status(StreamStatus::Disconnected);
                    self.release_ownership().await;

                    let delay = backoff.next_delay();
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        failures = backoff.failures(),
                        "Backing off before reconnect"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.release_ownership().await;
        self.hub.publish_status(StreamStatus::Stopped);
        tracing::info!("Stream manager stopped");
        Ok(())
    }

    async fn release_ownership(&self) {
        if let Err(e) = self.elector.release().await {
            tracing::warn!(error = %e, "Failed to release stream ownership");
        }
    }

    /// Provision a subscription, allocate the stream socket and run it.
    async fn provision_and_run(&self, backoff: &mut ReconnectBackoff) -> Result<(), StreamError> {
        let credential = self.credentials.valid_credential().await?;
        let subscription = self.build_subscription(&credential).await?;
        let ids = subscription.effective_ids(self.config.fallback_instrument_id);
        let port = self.allocate_stream_port(&credential, &ids).await?;
        let url = stream_url(&credential.api_server, port, &ids);

        let result = self.connect_and_run(&credential, &url, backoff).await;
        if matches!(result, Err(StreamError::TokenInvalid)) {
            // Rotate past the exact token this socket presented; a fresher
            // credential another instance already published satisfies this
            // without a rotation.
            self.rotate_past(&credential).await;
        }
        result
    }

    async fn rotate_past(&self, credential: &Credential) {
        tracing::warn!("Access token invalidated by provider, rotating past it");
        if let Err(e) = self.credentials.force_refresh(&credential.access_token).await {
            tracing::warn!(error = %e, "Forced credential rotation failed");
        }
    }

    /// Resolve open positions to subscription IDs and merge in the
    /// explicitly requested instruments.
    async fn build_subscription(
        &self,
        credential: &Credential,
    ) -> Result<SubscriptionSet, StreamError> {
        let positions = self.positions.list_open_positions().await?;

        let mut resolved = Vec::with_capacity(positions.len());
        for position in positions {
            let Some(osi) = position.to_osi() else {
                tracing::warn!(symbol = %position.symbol, "Position strike does not fit OSI, skipping");
                continue;
            };
            match self.resolver.resolve(credential, &osi.to_osi()).await? {
                Some(id) => resolved.push(id),
                None => {
                    tracing::warn!(ticker = %osi, "Position did not resolve, skipping");
                }
            }
        }

        let requested: Vec<u64> = self.requested.read().iter().copied().collect();
        Ok(SubscriptionSet::from_ids(resolved, requested))
    }

    /// Allocate a stream socket port for the given subscription.
    async fn allocate_stream_port(
        &self,
        credential: &Credential,
        ids: &[u64],
    ) -> Result<u16, StreamError> {
        let url = format!("{}v1/markets/quotes", credential.api_server);
        let auth = credential.bearer();
        let ids_param = join_ids(ids);

        let response: StreamPortResponse = self
            .http
            .execute(move |client| {
                client.get(&url).header(AUTHORIZATION, &auth).query(&[
                    ("ids", ids_param.as_str()),
                    ("stream", "true"),
                    ("mode", "WebSocket"),
                ])
            })
            .await?;
        Ok(response.stream_port)
    }

    /// Connect the socket and process frames until an error or cancellation.
    async fn connect_and_run(
        &self,
        credential: &Credential,
        url: &str,
        backoff: &mut ReconnectBackoff,
    ) -> Result<(), StreamError> {
        tracing::info!(url, "Connecting to quote stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // The access token is presented as the first frame; the server
        // answers with a success acknowledgement.
        write
            .send(Message::Text(credential.access_token.clone().into()))
            .await?;

        let mut renew_timer = tokio::time::interval(self.elector.config().renew_interval);
        let mut resync_timer = tokio::time::interval(self.config.resync_interval);
        // Both fire immediately on creation; skip the first ticks.
        renew_timer.tick().await;
        resync_timer.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = renew_timer.tick() => {
                    if !self.elector.renew().await? {
                        return Err(StreamError::OwnershipLost);
                    }
                }
                _ = resync_timer.tick() => {
                    match self.build_subscription(credential).await {
                        Ok(subscription) => {
                            let ids = subscription.effective_ids(self.config.fallback_instrument_id);
                            tracing::debug!(count = ids.len(), "Resyncing subscription");
                            write.send(Message::Text(resync_frame(&ids).into())).await?;
                        }
                        Err(e) => {
                            // Keep the current subscription; resync again next tick.
                            tracing::warn!(error = %e, "Subscription rebuild failed, keeping current set");
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text, backoff)?;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server closed the stream");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::ConnectionClosed),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str, backoff: &mut ReconnectBackoff) -> Result<(), StreamError> {
        let frame = match StreamFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                // Unknown frame shapes are skipped, not fatal.
                tracing::debug!(error = %e, "Undecodable stream frame");
                return Ok(());
            }
        };

        match frame {
            StreamFrame::Quotes { quotes } => {
                for quote in quotes {
                    self.hub.publish_quote(quote);
                }
            }
            StreamFrame::Success { success } => {
                if success {
                    tracing::info!("Stream authenticated");
                    backoff.reset();
                    self.hub.publish_status(StreamStatus::Connected);
                }
            }
            StreamFrame::Error { code, message } => {
                if code == super::messages::ACCESS_TOKEN_INVALID {
                    return Err(StreamError::TokenInvalid);
                }
                tracing::warn!(code, message, "Stream error frame");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("config", &self.config)
            .field("instance", &self.elector.instance_id())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Build the stream socket URL from the account API server, the allocated
/// port and the subscription IDs.
fn stream_url(api_server: &str, port: u16, ids: &[u64]) -> String {
    let host = api_server
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!(
        "wss://{host}:{port}/v1/markets/quotes?ids={}&stream=true&mode=WebSocket",
        join_ids(ids)
    )
}

/// Full-replacement subscription frame sent on resync.
fn resync_frame(ids: &[u64]) -> String {
    format!(r#"{{"ids":"{}"}}"#, join_ids(ids))
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::super::auth::AuthConfig;
    use super::*;
    use crate::application::ports::{MockPositionStore, OpenPosition};
    use crate::domain::symbol::OptionSide;
    use crate::infrastructure::coordination::InMemoryCoordinationStore;
    use crate::infrastructure::questrade::elector::ElectionConfig;
    use crate::infrastructure::questrade::http::RateLimitConfig;
    use crate::infrastructure::questrade::symbols::SymbolResolverConfig;

    #[test]
    fn stream_url_strips_scheme_and_slash() {
        let url = stream_url("https://api01.iq.questrade.com/", 27467, &[8049, 1234]);
        assert_eq!(
            url,
            "wss://api01.iq.questrade.com:27467/v1/markets/quotes?ids=8049,1234&stream=true&mode=WebSocket"
        );
    }

    #[test]
    fn resync_frame_is_full_replacement() {
        assert_eq!(resync_frame(&[1, 2, 3]), r#"{"ids":"1,2,3"}"#);
        assert_eq!(resync_frame(&[8049]), r#"{"ids":"8049"}"#);
    }

    fn credential_for(server: &MockServer) -> Credential {
        Credential {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            api_server: format!("{}/", server.uri()),
            token_type: "Bearer".to_string(),
            expires_in: 1800,
            expires_at: Utc::now() + chrono::Duration::seconds(1800),
        }
    }

    fn manager_with_positions(
        server: &MockServer,
        positions: Vec<OpenPosition>,
    ) -> Arc<StreamManager> {
        manager_with(server, positions, &Arc::new(InMemoryCoordinationStore::new()))
    }

    fn manager_with(
        server: &MockServer,
        positions: Vec<OpenPosition>,
        shared_store: &Arc<InMemoryCoordinationStore>,
    ) -> Arc<StreamManager> {
        let http =
            RateLimitedClient::new(Duration::from_secs(5), RateLimitConfig::default()).unwrap();
        let resolver = Arc::new(SymbolResolver::new(
            http.clone(),
            SymbolResolverConfig::default(),
        ));

        let mut position_store = MockPositionStore::new();
        position_store
            .expect_list_open_positions()
            .returning(move || Ok(positions.clone()));

        let store: Arc<dyn crate::application::ports::CoordinationStore> =
            Arc::clone(shared_store) as _;
        let elector = StreamLeaderElector::new(
            Arc::clone(&store),
            ElectionConfig::default(),
            "test-instance",
        );
        let settings = Arc::new(crate::application::ports::MockSettingsStore::new());
        let credentials = Arc::new(CredentialManager::new(
            AuthConfig {
                token_url: format!("{}/oauth2/token", server.uri()),
                ..AuthConfig::default()
            },
            http.clone(),
            settings,
            store,
            "test-instance",
        ));

        Arc::new(StreamManager::new(
            StreamConfig::default(),
            http,
            credentials,
            resolver,
            Arc::new(position_store),
            elector,
            Arc::new(BroadcastHub::default()),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn empty_positions_fall_back_to_default_instrument() {
        let server = MockServer::start().await;
        let manager = manager_with_positions(&server, vec![]);

        let subscription = manager
            .build_subscription(&credential_for(&server))
            .await
            .unwrap();
        assert_eq!(subscription.effective_ids(8049), vec![8049]);
    }

    #[tokio::test]
    async fn unresolvable_position_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/symbols/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"symbols":[]}"#))
            .mount(&server)
            .await;

        let positions = vec![OpenPosition {
            symbol: "ZZZZ".to_string(),
            side: OptionSide::Call,
            strike: Decimal::new(10, 0),
            expiry: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
        }];
        let manager = manager_with_positions(&server, positions);

        let subscription = manager
            .build_subscription(&credential_for(&server))
            .await
            .unwrap();
        // Nothing resolved, so the fallback keeps the stream alive.
        assert_eq!(subscription.effective_ids(8049), vec![8049]);
    }

    #[tokio::test]
    async fn resolved_positions_form_the_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/symbols/search"))
            .and(query_param("prefix", "AAPL250117C00170000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"symbols":[{"symbol":"AAPL250117C00170000","symbolId":555,"securityType":"Option"}]}"#,
            ))
            .mount(&server)
            .await;

        let positions = vec![OpenPosition {
            symbol: "AAPL".to_string(),
            side: OptionSide::Call,
            strike: Decimal::new(170, 0),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
        }];
        let manager = manager_with_positions(&server, positions);

        let subscription = manager
            .build_subscription(&credential_for(&server))
            .await
            .unwrap();
        assert_eq!(subscription.effective_ids(8049), vec![555]);
    }

    #[tokio::test]
    async fn requested_ids_merge_into_the_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/symbols/search"))
            .and(query_param("prefix", "AAPL250117C00170000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"symbols":[{"symbol":"AAPL250117C00170000","symbolId":555,"securityType":"Option"}]}"#,
            ))
            .mount(&server)
            .await;

        let positions = vec![OpenPosition {
            symbol: "AAPL".to_string(),
            side: OptionSide::Call,
            strike: Decimal::new(170, 0),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
        }];
        let manager = manager_with_positions(&server, positions);
        manager.request_id(42);

        let subscription = manager
            .build_subscription(&credential_for(&server))
            .await
            .unwrap();
        assert_eq!(subscription.effective_ids(8049), vec![42, 555]);
    }

    #[tokio::test]
    async fn requested_id_alone_suppresses_the_fallback() {
        let server = MockServer::start().await;
        let manager = manager_with_positions(&server, vec![]);
        manager.request_id(42);

        let subscription = manager
            .build_subscription(&credential_for(&server))
            .await
            .unwrap();
        assert_eq!(subscription.effective_ids(8049), vec![42]);
    }

    #[tokio::test]
    async fn invalidated_token_reuses_a_fresher_published_credential() {
        use crate::application::ports::CoordinationStore as _;

        let server = MockServer::start().await;
        // Any rotation attempt would hit this and fail the expectation.
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCoordinationStore::new());
        let mut fresh = credential_for(&server);
        fresh.access_token = "access-fresh".to_string();
        store
            .set(
                "questrade:credential",
                &serde_json::to_string(&fresh).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let manager = manager_with(&server, vec![], &store);
        let mut dead = credential_for(&server);
        dead.access_token = "access-dead".to_string();

        // Another instance already rotated past the dead token; the socket's
        // credential must not trigger a second rotation.
        manager.rotate_past(&dead).await;

        let current = manager.credentials.valid_credential().await.unwrap();
        assert_eq!(current.access_token, "access-fresh");
    }

    #[tokio::test]
    async fn stream_port_allocation_sends_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/markets/quotes"))
            .and(query_param("ids", "8049"))
            .and(query_param("stream", "true"))
            .and(query_param("mode", "WebSocket"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"streamPort":27467}"#))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_with_positions(&server, vec![]);
        let port = manager
            .allocate_stream_port(&credential_for(&server), &[8049])
            .await
            .unwrap();
        assert_eq!(port, 27467);
    }
}
