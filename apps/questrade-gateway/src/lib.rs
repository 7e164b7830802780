#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Questrade Gateway - Brokerage Connectivity Layer
//!
//! Maintains the single cluster-wide connection to the Questrade brokerage:
//! one OAuth credential shared across instances (refresh tokens are
//! single-use), one quote stream owned by an elected leader, and symbol
//! resolution from OSI option tickers to the provider's numeric IDs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Option symbols and subscription sets
//!   - `symbol`: OSI parsing and Questrade-native conversion
//!   - `subscription`: deterministic subscription ID sets
//!
//! - **Application**: Port definitions
//!   - `ports`: settings, position and coordination store interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `questrade`: credential rotation, REST executor, symbol resolution,
//!     ownership election, the quote stream
//!   - `coordination`: shared-store distributed lock (redis / in-memory)
//!   - `broadcast`: in-process quote and status fan-out
//!   - `config`: environment configuration
//!   - `health`: health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Positions ──► Symbol Resolver ──► Subscription ──┐
//!                                                  ▼
//! Credential Manager ──► Stream Manager ──► wss socket ──► Broadcast Hub
//!        ▲                     ▲
//!        └── shared KV store ──┘  (rotation lock, ownership lock)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core option-symbol types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::subscription::SubscriptionSet;
pub use domain::symbol::{OptionSide, OsiSymbol, SymbolError};

// Ports
pub use application::ports::{
    CoordinationStore, OpenPosition, PositionStore, SettingsStore, StoreError,
};

// Infrastructure config
pub use infrastructure::config::{GatewayConfig, ServerSettings};

// Coordination
pub use infrastructure::coordination::{
    DistributedLock, InMemoryCoordinationStore, RedisCoordinationStore,
};

// Questrade adapters
pub use infrastructure::questrade::{
    AuthConfig, Credential, CredentialError, CredentialManager, ElectionConfig, QuoteMessage,
    RateLimitConfig, RateLimitedClient, StreamConfig, StreamLeaderElector, StreamManager,
    SymbolResolver, SymbolResolverConfig,
};

// Broadcast hub (for integration tests and embedders)
pub use infrastructure::broadcast::{BroadcastHub, StreamStatus};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, init as init_telemetry};
