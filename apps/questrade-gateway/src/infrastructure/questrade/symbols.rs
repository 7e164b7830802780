//! Symbol Resolution
//!
//! Maps option tickers in OSI notation (e.g. `AAPL250117C00170000`) to the
//! provider's numeric symbol IDs, which is what the quote stream subscribes
//! with. Resolution runs through three tiers, cheapest first:
//!
//! 1. search for the ticker verbatim,
//! 2. convert OSI to Questrade's native option notation and search again,
//! 3. walk the underlying's option chain and match expiry, strike and side.
//!
//! Successful resolutions are cached in-process; an unresolvable ticker is
//! `Ok(None)`, not an error, so one bad position cannot poison a
//! subscription rebuild.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;

use super::auth::Credential;
use super::http::{ApiError, RateLimitedClient};
use super::messages::{OptionChainResponse, SymbolSearchResponse};
use crate::domain::symbol::{OptionSide, OsiSymbol};

/// Errors from symbol resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Resolver policy.
#[derive(Debug, Clone)]
pub struct SymbolResolverConfig {
    /// How long a resolved ID stays cached. Symbol IDs are stable, so this
    /// mostly bounds memory for long-dead contracts.
    pub cache_ttl: Duration,
}

impl Default for SymbolResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    id: u64,
    cached_at: Instant,
}

/// Ticker to numeric-symbol-ID resolver with an in-process cache.
pub struct SymbolResolver {
    http: RateLimitedClient,
    config: SymbolResolverConfig,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl SymbolResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(http: RateLimitedClient, config: SymbolResolverConfig) -> Self {
        Self {
            http,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `ticker` to the provider's numeric symbol ID.
    ///
    /// Returns `Ok(None)` when all tiers miss.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Api` when a REST call fails outright.
    pub async fn resolve(
        &self,
        credential: &Credential,
        ticker: &str,
    ) -> Result<Option<u64>, ResolveError> {
        let normalized = ticker.trim().to_uppercase();
        if normalized.is_empty() {
            return Ok(None);
        }

        if let Some(id) = self.cached(&normalized) {
            return Ok(Some(id));
        }

        let resolved = self.resolve_uncached(credential, &normalized).await?;
        if let Some(id) = resolved {
            self.cache.write().insert(
                normalized,
                CacheEntry {
                    id,
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(resolved)
    }

    async fn resolve_uncached(
        &self,
        credential: &Credential,
        ticker: &str,
    ) -> Result<Option<u64>, ResolveError> {
        // Tier 1: the ticker as-is.
        if let Some(id) = self.search_exact(credential, ticker).await? {
            return Ok(Some(id));
        }

        let Ok(osi) = ticker.parse::<OsiSymbol>() else {
            // Not an option ticker; nothing more to try.
            return Ok(None);
        };

        // Tier 2: provider-native option notation.
        let native = osi.to_questrade();
        if let Some(id) = self.search_exact(credential, &native).await? {
            tracing::debug!(ticker, native, "Resolved via native option notation");
            return Ok(Some(id));
        }

        // Tier 3: walk the underlying's option chain.
        let id = self.resolve_via_chain(credential, &osi).await?;
        if id.is_some() {
            tracing::debug!(ticker, "Resolved via option chain walk");
        } else {
            tracing::warn!(ticker, "Symbol did not resolve in any tier");
        }
        Ok(id)
    }

    /// Search for `query` and return the ID of an exact (case-insensitive)
    /// symbol-name match, ignoring prefix-only matches.
    async fn search_exact(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Option<u64>, ResolveError> {
        let url = format!("{}v1/symbols/search", credential.api_server);
        let auth = credential.bearer();
        let query_owned = query.to_string();

        let response: SymbolSearchResponse = self
            .http
            .execute(move |client| {
                client
                    .get(&url)
                    .header(AUTHORIZATION, &auth)
                    .query(&[("prefix", query_owned.as_str())])
            })
            .await?;

        Ok(response
            .symbols
            .iter()
            .find(|m| m.symbol.eq_ignore_ascii_case(query))
            .map(|m| m.symbol_id))
    }

    async fn resolve_via_chain(
        &self,
        credential: &Credential,
        osi: &OsiSymbol,
    ) -> Result<Option<u64>, ResolveError> {
        let Some(underlying_id) = self.search_exact(credential, &osi.root).await? else {
            return Ok(None);
        };

        let url = format!("{}v1/symbols/{underlying_id}/options", credential.api_server);
        let auth = credential.bearer();
        let chain: OptionChainResponse = self
            .http
            .execute(move |client| client.get(&url).header(AUTHORIZATION, &auth))
            .await?;

        let strike = osi.strike();
        let id = chain
            .option_chain
            .iter()
            .filter(|expiry| expiry.expiry_day() == Some(osi.expiry))
            .flat_map(|expiry| &expiry.chain_per_root)
            .flat_map(|root| &root.chain_per_strike_price)
            .find(|entry| entry.strike_price == strike)
            .and_then(|entry| match osi.side {
                OptionSide::Call => entry.call_symbol_id,
                OptionSide::Put => entry.put_symbol_id,
            });
        Ok(id)
    }

    fn cached(&self, ticker: &str) -> Option<u64> {
        let cache = self.cache.read();
        cache
            .get(ticker)
            .filter(|e| e.cached_at.elapsed() < self.config.cache_ttl)
            .map(|e| e.id)
    }

    /// Number of cached resolutions, for diagnostics.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl std::fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolResolver")
            .field("config", &self.config)
            .field("cached", &self.cache_len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
