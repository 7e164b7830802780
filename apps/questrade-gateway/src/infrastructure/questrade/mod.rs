//! Questrade Adapters
//!
//! Everything that talks to the brokerage: OAuth credential rotation, the
//! rate-limited REST executor, symbol resolution, stream ownership election
//! and the quote stream itself.

pub mod auth;
pub mod elector;
pub mod http;
pub mod messages;
pub mod reconnect;
pub mod stream;
pub mod symbols;

pub use auth::{AuthConfig, Credential, CredentialError, CredentialManager};
pub use elector::{ElectionConfig, StreamLeaderElector};
pub use http::{ApiError, RateLimitConfig, RateLimitedClient};
pub use messages::{QuoteMessage, StreamFrame, TokenResponse};
pub use reconnect::{BackoffConfig, ReconnectBackoff};
pub use stream::{StreamConfig, StreamError, StreamManager};
pub use symbols::{ResolveError, SymbolResolver, SymbolResolverConfig};
