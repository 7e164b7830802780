//! Credential Manager
//!
//! Maintains the single cluster-wide OAuth credential. Questrade refresh
//! tokens are single-use: presenting one twice invalidates the whole
//! session. At most one instance may therefore ever be mid-rotation, which
//! this manager enforces with an advisory rotation lock in the shared
//! coordination store.
//!
//! # Lookup order
//!
//! 1. in-memory cache (valid for at least the configured margin),
//! 2. credential published in the shared store,
//! 3. rotation — either performed under the lock, or waited out while
//!    another instance rotates.
//!
//! The new refresh token is persisted durably *before* the lock is
//! released, so a crash mid-rotation cannot leave the durable store holding
//! an already-consumed token while the lock is free.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::http::{ApiError, RateLimitedClient};
use super::messages::TokenResponse;
use crate::application::ports::{CoordinationStore, SettingsStore, StoreError};
use crate::infrastructure::coordination::DistributedLock;

// =============================================================================
// Errors
// =============================================================================

/// Errors from credential acquisition and rotation.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No refresh token in durable settings and no bootstrap value configured.
    #[error("no refresh token available: settings empty and no bootstrap configured")]
    MissingRefreshToken,

    /// The upstream authorization endpoint rejected the rotation.
    #[error("credential rotation failed: {0}")]
    RotationFailed(#[source] ApiError),

    /// Another instance was rotating and no credential appeared in time.
    #[error("timed out after {attempts} polls waiting for another instance's rotation")]
    RotationTimeout {
        /// Number of polls performed.
        attempts: u32,
    },

    /// Shared or durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A published credential could not be decoded.
    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),
}

// =============================================================================
// Credential
// =============================================================================

/// The cluster-wide brokerage credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for REST and stream authentication.
    pub access_token: String,
    /// Single-use token for the next rotation.
    pub refresh_token: String,
    /// Account-specific API server base URL, with trailing slash.
    pub api_server: String,
    /// Token type (always `Bearer`).
    pub token_type: String,
    /// Lifetime at issue time, seconds.
    pub expires_in: i64,
    /// Wall-clock expiry derived at rotation time.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a token response at `now`.
    #[must_use]
    pub fn from_token_response(token: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            api_server: token.api_server,
            token_type: token.token_type,
            expires_in: token.expires_in,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        }
    }

    /// Whether the credential remains valid for at least `margin` from now.
    #[must_use]
    pub fn is_valid_for(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        Utc::now() + margin < self.expires_at
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("api_server", &self.api_server)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Credential manager policy.
#[derive(Clone)]
pub struct AuthConfig {
    /// OAuth token endpoint URL.
    pub token_url: String,
    /// Bootstrap refresh token used only when settings hold none.
    pub bootstrap_refresh_token: Option<String>,
    /// Settings key holding the durable refresh token.
    pub settings_refresh_key: String,
    /// Shared-store key the credential is published under.
    pub credential_key: String,
    /// Shared-store key of the rotation lock.
    pub rotation_lock_key: String,
    /// Rotation lock TTL.
    pub rotation_lock_ttl: Duration,
    /// Minimum remaining validity before a credential counts as expired.
    pub validity_margin: Duration,
    /// Interval between polls while another instance rotates.
    pub poll_interval: Duration,
    /// Maximum number of polls before `RotationTimeout`.
    pub poll_attempts: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: "https://login.questrade.com/oauth2/token".to_string(),
            bootstrap_refresh_token: None,
            settings_refresh_key: "questrade.refresh_token".to_string(),
            credential_key: "questrade:credential".to_string(),
            rotation_lock_key: "questrade:rotation".to_string(),
            rotation_lock_ttl: Duration::from_secs(30),
            validity_margin: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            poll_attempts: 20,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field(
                "bootstrap_refresh_token",
                &self.bootstrap_refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rotation_lock_ttl", &self.rotation_lock_ttl)
            .field("poll_interval", &self.poll_interval)
            .field("poll_attempts", &self.poll_attempts)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Credential Manager
// =============================================================================

/// Maintains a valid credential, serializing rotation across instances.
pub struct CredentialManager {
    config: AuthConfig,
    http: RateLimitedClient,
    settings: Arc<dyn SettingsStore>,
    store: Arc<dyn CoordinationStore>,
    lock: DistributedLock,
    // The shared-store lock is keyed by instance id, so it cannot tell two
    // tasks in this process apart; this mutex serializes them.
    rotation_guard: tokio::sync::Mutex<()>,
    cache: RwLock<Option<Credential>>,
}

impl CredentialManager {
    /// Create a manager for this instance.
    ///
    /// `instance_id` becomes the rotation-lock owner marker.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        http: RateLimitedClient,
        settings: Arc<dyn SettingsStore>,
        store: Arc<dyn CoordinationStore>,
        instance_id: &str,
    ) -> Self {
        let lock = DistributedLock::new(
            Arc::clone(&store),
            config.rotation_lock_key.clone(),
            instance_id,
            config.rotation_lock_ttl,
        );
        Self {
            config,
            http,
            settings,
            store,
            lock,
            rotation_guard: tokio::sync::Mutex::new(()),
            cache: RwLock::new(None),
        }
    }

    /// Return a credential valid for at least the configured margin,
    /// rotating or waiting for a concurrent rotation as needed.
    pub async fn valid_credential(&self) -> Result<Credential, CredentialError> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }

        if let Some(published) = self.read_published(None).await? {
            *self.cache.write() = Some(published.clone());
            return Ok(published);
        }

        self.rotate_or_wait(None).await
    }

    /// Out-of-band refresh after the stream signalled an invalid token.
    ///
    /// Discards the local cache and, unless another instance already
    /// published a credential different from the invalidated one, performs
    /// a full rotation.
    pub async fn force_refresh(
        &self,
        invalid_access_token: &str,
    ) -> Result<Credential, CredentialError> {
        *self.cache.write() = None;

        if let Some(published) = self.read_published(Some(invalid_access_token)).await? {
            *self.cache.write() = Some(published.clone());
            return Ok(published);
        }

        self.rotate_or_wait(Some(invalid_access_token)).await
    }

    fn cached(&self) -> Option<Credential> {
        self.cache
            .read()
            .as_ref()
            .filter(|c| c.is_valid_for(self.config.validity_margin))
            .cloned()
    }

    /// Read the published credential, ignoring ones about to expire and
    /// (during a forced refresh) the one known to be invalidated.
    async fn read_published(
        &self,
        invalid_access_token: Option<&str>,
    ) -> Result<Option<Credential>, CredentialError> {
        let Some(raw) = self.store.get(&self.config.credential_key).await? else {
            return Ok(None);
        };
        let credential: Credential =
            serde_json::from_str(&raw).map_err(|e| CredentialError::Corrupt(e.to_string()))?;
        Ok(Some(credential)
            .filter(|c| c.is_valid_for(self.config.validity_margin))
            .filter(|c| invalid_access_token != Some(c.access_token.as_str())))
    }

    async fn rotate_or_wait(
        &self,
        invalid_access_token: Option<&str>,
    ) -> Result<Credential, CredentialError> {
        let _rotation_guard = self.rotation_guard.lock().await;

        if self.lock.try_acquire().await? {
            // Double-check under the lock: another instance may have rotated
            // between our store read and the acquisition.
            match self.read_published(invalid_access_token).await {
                Ok(Some(published)) => {
                    if let Err(e) = self.lock.release().await {
                        tracing::warn!(error = %e, "Failed to release rotation lock");
                    }
                    *self.cache.write() = Some(published.clone());
                    return Ok(published);
                }
                Ok(None) => {}
                Err(e) => {
                    if let Err(release_err) = self.lock.release().await {
                        tracing::warn!(error = %release_err, "Failed to release rotation lock");
                    }
                    return Err(e);
                }
            }

            let result = self.rotate().await;
            // Always release, but only after the rotation either published a
            // complete credential or failed without touching durable state.
            if let Err(e) = self.lock.release().await {
                tracing::warn!(error = %e, "Failed to release rotation lock");
            }
            return result;
        }

        self.wait_for_rotation(invalid_access_token).await
    }

    /// Perform one rotation. Caller must hold the rotation lock.
    async fn rotate(&self) -> Result<Credential, CredentialError> {
        let refresh_token = match self
            .settings
            .get_setting(&self.config.settings_refresh_key)
            .await?
        {
            Some(token) if !token.is_empty() => token,
            _ => self
                .config
                .bootstrap_refresh_token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or(CredentialError::MissingRefreshToken)?,
        };

        tracing::info!("Rotating brokerage credential");

        let token_url = self.config.token_url.clone();
        let token: TokenResponse = self
            .http
            .execute(move |client| {
                client.post(&token_url).form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                ])
            })
            .await
            .map_err(CredentialError::RotationFailed)?;

        let credential = Credential::from_token_response(token, Utc::now());

        // Durability before lock release: the old refresh token is already
        // consumed, so losing the new one here would strand the fleet.
        self.settings
            .upsert_setting(&self.config.settings_refresh_key, &credential.refresh_token)
            .await?;

        self.publish(&credential).await?;
        *self.cache.write() = Some(credential.clone());

        tracing::info!(
            api_server = %credential.api_server,
            expires_at = %credential.expires_at,
            "Credential rotated"
        );
        Ok(credential)
    }

    async fn publish(&self, credential: &Credential) -> Result<(), CredentialError> {
        let json = serde_json::to_string(credential)
            .map_err(|e| CredentialError::Corrupt(e.to_string()))?;
        self.store
            .set(&self.config.credential_key, &json, publish_ttl(credential))
            .await?;
        Ok(())
    }

    /// Bounded poll of the shared store while another instance rotates.
    async fn wait_for_rotation(
        &self,
        invalid_access_token: Option<&str>,
    ) -> Result<Credential, CredentialError> {
        for attempt in 1..=self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            if let Some(published) = self.read_published(invalid_access_token).await? {
                tracing::debug!(attempt, "Picked up credential rotated by another instance");
                *self.cache.write() = Some(published.clone());
                return Ok(published);
            }
        }

        Err(CredentialError::RotationTimeout {
            attempts: self.config.poll_attempts,
        })
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("config", &self.config)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Shared-store TTL for a published credential: slightly under its
/// lifetime so the entry always lapses before the token it carries.
fn publish_ttl(credential: &Credential) -> Duration {
    let secs = credential.expires_in.saturating_sub(60).max(30);
    Duration::from_secs(u64::try_from(secs).unwrap_or(30))
}

// =============================================================================
// Tests
// =============================================================================
