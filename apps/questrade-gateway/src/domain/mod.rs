//! Domain Layer - Core option-symbol and subscription types.
//!
//! Pure types with no I/O: option symbol formats and the desired
//! subscription set for the quote stream.

/// OSI option symbols and Questrade native-format conversion.
pub mod symbol;

/// Desired subscription set for the quote stream.
pub mod subscription;
