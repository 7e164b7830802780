//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broadcast channel adapters for quote distribution.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Shared coordination store and distributed lock.
pub mod coordination;

/// Health check HTTP endpoint.
pub mod health;

/// Questrade REST and stream adapters.
pub mod questrade;

/// Tracing setup.
pub mod telemetry;
