//! Questrade Wire Types
//!
//! Serde types for the REST endpoints this gateway consumes (token
//! rotation, symbol search, option chains, stream allocation) and for the
//! JSON frames carried on the quote stream socket.

use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;

/// Error code the stream pushes when the access token has been invalidated.
pub const ACCESS_TOKEN_INVALID: i32 = 1017;

// =============================================================================
// OAuth Token Endpoint
// =============================================================================

/// Response from the OAuth token endpoint.
///
/// The returned `refresh_token` replaces the one presented: Questrade
/// refresh tokens are single-use, and presenting a consumed token
/// invalidates the whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for REST and stream authentication.
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds (typically 1800).
    pub expires_in: i64,
    /// Replacement single-use refresh token.
    pub refresh_token: String,
    /// Account-specific API server base URL, with trailing slash.
    pub api_server: String,
}

// =============================================================================
// Symbol Search
// =============================================================================

/// Response from `GET v1/symbols/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolSearchResponse {
    /// Matched symbols; empty when nothing matched (not an error).
    pub symbols: Vec<SymbolMatch>,
}

/// One matched symbol from a search.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMatch {
    /// Symbol name as Questrade knows it.
    pub symbol: String,
    /// Numeric symbol identifier.
    pub symbol_id: u64,
    /// Security type (`Stock`, `Option`, ...).
    #[serde(default)]
    pub security_type: Option<String>,
}

// =============================================================================
// Option Chain
// =============================================================================

/// Response from `GET v1/symbols/{id}/options`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChainResponse {
    /// One entry per expiry date.
    pub option_chain: Vec<ChainExpiry>,
}

/// All contracts for a single expiry date.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExpiry {
    /// Expiry as an ISO-8601 date-time (e.g. `2025-01-17T00:00:00.000000-05:00`).
    pub expiry_date: String,
    /// Per-root breakdown (one root in almost all chains).
    pub chain_per_root: Vec<ChainRoot>,
}

impl ChainExpiry {
    /// The calendar date portion of `expiry_date`.
    #[must_use]
    pub fn expiry_day(&self) -> Option<chrono::NaiveDate> {
        self.expiry_date
            .get(..10)
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }
}

/// Strike ladder for one option root.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRoot {
    /// Option root ticker.
    pub option_root: String,
    /// Per-strike call/put IDs.
    pub chain_per_strike_price: Vec<ChainStrike>,
}

/// Call and put IDs at one strike price.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStrike {
    /// Strike price in dollars.
    pub strike_price: Decimal,
    /// Call contract symbol id.
    #[serde(default)]
    pub call_symbol_id: Option<u64>,
    /// Put contract symbol id.
    #[serde(default)]
    pub put_symbol_id: Option<u64>,
}

// =============================================================================
// Stream Allocation
// =============================================================================

/// Response from `GET v1/markets/quotes?stream=true&mode=WebSocket`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPortResponse {
    /// Ephemeral port to open the stream socket against.
    pub stream_port: u16,
}

// =============================================================================
// Stream Frames
// =============================================================================

/// A level-1 quote record pushed on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMessage {
    /// Symbol name.
    pub symbol: String,
    /// Numeric symbol identifier.
    pub symbol_id: u64,
    /// Bid price.
    #[serde(default)]
    pub bid_price: Option<Decimal>,
    /// Bid size.
    #[serde(default)]
    pub bid_size: Option<u64>,
    /// Ask price.
    #[serde(default)]
    pub ask_price: Option<Decimal>,
    /// Ask size.
    #[serde(default)]
    pub ask_size: Option<u64>,
    /// Last trade price.
    #[serde(default)]
    pub last_trade_price: Option<Decimal>,
    /// Cumulative volume.
    #[serde(default)]
    pub volume: Option<u64>,
    /// Whether trading is halted.
    #[serde(default)]
    pub is_halted: Option<bool>,
}

/// Inbound frames on the stream socket.
///
/// The socket carries JSON objects that either contain an array of quote
/// records, an error code, or a success acknowledgement after the access
/// token is presented.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    /// A batch of quote records.
    Quotes {
        /// The quote records.
        quotes: Vec<QuoteMessage>,
    },
    /// An upstream error.
    Error {
        /// Provider error code ([`ACCESS_TOKEN_INVALID`] signals a dead token).
        code: i32,
        /// Human-readable message.
        message: String,
    },
    /// Acknowledgement of stream authentication.
    Success {
        /// Whether the token was accepted.
        success: bool,
    },
}

impl StreamFrame {
    /// Decode a text frame from the socket.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the payload matches no known frame shape.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether this frame signals that the access token was invalidated.
    #[must_use]
    pub const fn is_token_invalid(&self) -> bool {
        matches!(self, Self::Error { code, .. } if *code == ACCESS_TOKEN_INVALID)
    }
}

// =============================================================================
// Tests
// =============================================================================
