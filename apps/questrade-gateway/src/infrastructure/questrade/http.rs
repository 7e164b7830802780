//! Rate-Limited Request Executor
//!
//! Wraps every outbound REST call to the Questrade API. Questrade
//! rate-limits aggressively and reports the window reset time in the
//! `X-RateLimit-Reset` header (epoch seconds); on a 429 this executor waits
//! until that reset (plus a small buffer) and retries, up to a bounded
//! count. Any other error status is not retried and is propagated with the
//! response body attached for diagnostics.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Header carrying the rate-limit window reset time (epoch seconds).
const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

// =============================================================================
// Errors
// =============================================================================

/// Errors from the rate-limited executor.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Rate-limit retries exhausted.
    #[error("rate limited after {attempts} attempts: {body}")]
    RateLimited {
        /// Number of attempts made.
        attempts: u32,
        /// Body of the final 429 response.
        body: String,
    },

    /// Non-429 error status from the API.
    #[error("upstream error {status}: {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Rate-limit handling policy.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Added on top of the reported reset time before retrying.
    pub reset_buffer: Duration,
    /// Wait used when a 429 carries no reset header.
    pub default_wait: Duration,
    /// Maximum number of retries after the first 429.
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            reset_buffer: Duration::from_secs(1),
            default_wait: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// HTTP client wrapper that enforces the rate-limit policy.
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    client: Client,
    config: RateLimitConfig,
}

impl RateLimitedClient {
    /// Create an executor with the given policy.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Network` if the underlying client cannot be built.
    pub fn new(timeout: Duration, config: RateLimitConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create an executor around an existing client.
    #[must_use]
    pub const fn with_client(client: Client, config: RateLimitConfig) -> Self {
        Self { client, config }
    }

    /// Access the underlying reqwest client.
    #[must_use]
    pub const fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a request, retrying on 429, and decode the JSON body.
    ///
    /// The request is rebuilt through `make` on every attempt since a sent
    /// request cannot be reused.
    ///
    /// # Errors
    ///
    /// - `ApiError::RateLimited` when 429 retries are exhausted
    /// - `ApiError::Upstream` for any other error status (no retry)
    /// - `ApiError::Network` / `ApiError::Decode` for transport and body issues
    pub async fn execute<T, F>(&self, make: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let response = self.execute_raw(make).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{e}: {text}")))
    }

    /// Execute a request, retrying on 429, and return the raw response.
    pub async fn execute_raw<F>(&self, make: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let response = make(&self.client)
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = rate_limit_wait(&response, &self.config);

                if attempts > self.config.max_retries {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::RateLimited { attempts, body });
                }

                tracing::warn!(
                    attempt = attempts,
                    wait_ms = wait.as_millis(),
                    "Rate limited, waiting for window reset"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            // Any other error status: no retry, attach body for diagnostics.
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
    }
}

/// Compute the wait for a 429 response: until `X-RateLimit-Reset` plus the
/// configured buffer, or the fixed default when the header is absent.
fn rate_limit_wait(response: &Response, config: &RateLimitConfig) -> Duration {
    let reset_epoch = response
        .headers()
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    reset_epoch.map_or(config.default_wait, |reset| {
        wait_until_reset(reset, Utc::now().timestamp(), config.reset_buffer)
    })
}

/// Wait from `now` until `reset_epoch`, plus `buffer`. A reset in the past
/// still waits the buffer so back-to-back 429s cannot spin.
fn wait_until_reset(reset_epoch: i64, now_epoch: i64, buffer: Duration) -> Duration {
    let until_reset = reset_epoch.saturating_sub(now_epoch).max(0);
    let secs = u64::try_from(until_reset).unwrap_or(0);
    Duration::from_secs(secs) + buffer
}

// =============================================================================
// Tests
// =============================================================================
