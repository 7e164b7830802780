//! Application Layer - Port definitions.
//!
//! Contracts for the external collaborators (settings, positions, shared
//! coordination store). Infrastructure adapters implement these ports.

/// Port interfaces for external systems.
pub mod ports;
