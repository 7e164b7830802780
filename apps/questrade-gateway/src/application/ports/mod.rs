//! Port Interfaces
//!
//! Interfaces for the external collaborators this gateway depends on,
//! following the Hexagonal Architecture pattern. Adapters live in the
//! infrastructure layer or in the embedding application.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`SettingsStore`]: durable key/value settings (holds the refresh token)
//! - [`PositionStore`]: open option positions to build subscriptions from
//! - [`CoordinationStore`]: cluster-visible key-value store used for
//!   advisory locks and the published credential

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::symbol::{OptionSide, OsiSymbol};

/// Error produced by any external store adapter.
#[derive(Debug, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Wrap an underlying error.
    pub fn from_source(e: impl std::fmt::Display) -> Self {
        Self(e.to_string())
    }
}

// =============================================================================
// Settings Store
// =============================================================================

/// Durable settings storage.
///
/// Holds the last-known refresh token between rotations. Persistence must be
/// durable: a rotation writes the new refresh token here *before* releasing
/// the rotation lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a setting by key. `Ok(None)` when the key has never been written.
    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite a setting.
    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

// =============================================================================
// Position Store
// =============================================================================

/// An open option position as the tracking store reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPosition {
    /// Underlying root ticker (e.g. `AAPL`).
    pub symbol: String,
    /// Call or put.
    pub side: OptionSide,
    /// Strike price in dollars.
    pub strike: Decimal,
    /// Contract expiry date.
    pub expiry: NaiveDate,
}

impl OpenPosition {
    /// Convert the position to an OSI option symbol.
    ///
    /// Returns `None` when the strike does not fit the OSI strike field.
    #[must_use]
    pub fn to_osi(&self) -> Option<OsiSymbol> {
        OsiSymbol::with_strike(self.symbol.clone(), self.expiry, self.side, self.strike)
    }
}

/// Read access to the external position-tracking store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// List all currently open option positions.
    async fn list_open_positions(&self) -> Result<Vec<OpenPosition>, StoreError>;
}

// =============================================================================
// Coordination Store
// =============================================================================

/// Cluster-visible key-value store used as the coordination primitive.
///
/// All cross-instance agreement (credential publication, rotation lock,
/// stream ownership) goes through these five operations. Locks built on top
/// are advisory: create-if-absent with expiry, periodic renewal, explicit
/// release, implicit release via TTL on crash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Write a value with a TTL only if the key is absent.
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Reset a key's TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_position_to_osi() {
        let pos = OpenPosition {
            symbol: "AAPL".to_string(),
            side: OptionSide::Call,
            strike: Decimal::new(170, 0),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
        };
        let osi = pos.to_osi().unwrap();
        assert_eq!(osi.to_osi(), "AAPL250117C00170000");
    }

    #[test]
    fn open_position_oversized_strike_is_none() {
        let pos = OpenPosition {
            symbol: "AAPL".to_string(),
            side: OptionSide::Put,
            strike: Decimal::new(999_999_999, 0),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
        };
        assert!(pos.to_osi().is_none());
    }
}
