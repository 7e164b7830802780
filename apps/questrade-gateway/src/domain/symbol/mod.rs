//! Option Symbol Types
//!
//! OSI-style option symbols and conversion to Questrade's native naming
//! convention.
//!
//! # Formats
//!
//! - OSI: `AAPL250117C00170000` — root, 2-digit year/month/day, side flag,
//!   8-digit strike in thousandths of a dollar.
//! - Questrade native: `AAPL17Jan25C170.00` — root, 2-digit day, 3-letter
//!   month, 2-digit year, side flag, decimal strike.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while parsing option symbols.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The string does not match the OSI option pattern.
    #[error("not an OSI option symbol: {0}")]
    NotOsi(String),

    /// The embedded expiry date is not a valid calendar date.
    #[error("invalid expiry date in OSI symbol: {0}")]
    InvalidDate(String),
}

// =============================================================================
// Option Side
// =============================================================================

/// Call or put side of an option contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionSide {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionSide {
    /// Single-letter flag used by both OSI and Questrade formats.
    #[must_use]
    pub const fn flag(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    /// Parse the side from a single-letter flag.
    #[must_use]
    pub const fn from_flag(c: char) -> Option<Self> {
        match c {
            'C' => Some(Self::Call),
            'P' => Some(Self::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "Call"),
            Self::Put => write!(f, "Put"),
        }
    }
}

// =============================================================================
// OSI Symbol
// =============================================================================

/// A parsed OSI-style option symbol.
///
/// The strike is stored in thousandths of a dollar exactly as encoded in the
/// OSI string, so no precision is lost round-tripping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OsiSymbol {
    /// Underlying root ticker (e.g. `AAPL`).
    pub root: String,
    /// Contract expiry date.
    pub expiry: NaiveDate,
    /// Call or put.
    pub side: OptionSide,
    /// Strike price in thousandths of a dollar (`170000` = $170.00).
    pub strike_millis: u64,
}

impl OsiSymbol {
    /// Create a symbol from its components.
    #[must_use]
    pub const fn new(root: String, expiry: NaiveDate, side: OptionSide, strike_millis: u64) -> Self {
        Self {
            root,
            expiry,
            side,
            strike_millis,
        }
    }

    /// Create a symbol from a decimal strike price.
    ///
    /// Returns `None` if the strike does not fit the 8-digit OSI field.
    #[must_use]
    pub fn with_strike(root: String, expiry: NaiveDate, side: OptionSide, strike: Decimal) -> Option<Self> {
        let millis = (strike * Decimal::from(1000)).trunc();
        let millis = u64::try_from(millis.mantissa() / 10i128.pow(millis.scale())).ok()?;
        if millis > 99_999_999 {
            return None;
        }
        Some(Self::new(root, expiry, side, millis))
    }

    /// Strike price as a decimal dollar amount.
    #[must_use]
    pub fn strike(&self) -> Decimal {
        Decimal::new(i64::try_from(self.strike_millis).unwrap_or(i64::MAX), 3).normalize()
    }

    /// Canonical OSI string, e.g. `AAPL250117C00170000`.
    #[must_use]
    pub fn to_osi(&self) -> String {
        format!(
            "{}{}{}{:08}",
            self.root,
            self.expiry.format("%y%m%d"),
            self.side.flag(),
            self.strike_millis,
        )
    }

    /// Questrade native option symbol, e.g. `AAPL17Jan25C170.00`.
    #[must_use]
    pub fn to_questrade(&self) -> String {
        format!(
            "{}{}{}{}",
            self.root,
            self.expiry.format("%d%b%y"),
            self.side.flag(),
            format_strike(self.strike_millis),
        )
    }
}

impl fmt::Display for OsiSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_osi())
    }
}

impl FromStr for OsiSymbol {
    type Err = SymbolError;

    /// Parse an OSI-style symbol: root + yymmdd + C/P + 8-digit strike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Minimum: 1-char root + 6-digit date + side + 8-digit strike.
        if s.len() < 16 {
            return Err(SymbolError::NotOsi(s.to_string()));
        }

        let (head, strike_str) = s.split_at(s.len() - 8);
        let (head, side_str) = head.split_at(head.len() - 1);
        let (root, date_str) = head.split_at(head.len().saturating_sub(6));

        if root.is_empty() || !root.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(SymbolError::NotOsi(s.to_string()));
        }
        if !date_str.chars().all(|c| c.is_ascii_digit())
            || !strike_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(SymbolError::NotOsi(s.to_string()));
        }

        let side = side_str
            .chars()
            .next()
            .and_then(OptionSide::from_flag)
            .ok_or_else(|| SymbolError::NotOsi(s.to_string()))?;

        let expiry = NaiveDate::parse_from_str(date_str, "%y%m%d")
            .map_err(|_| SymbolError::InvalidDate(s.to_string()))?;

        let strike_millis: u64 = strike_str
            .parse()
            .map_err(|_| SymbolError::NotOsi(s.to_string()))?;

        Ok(Self::new(root.to_string(), expiry, side, strike_millis))
    }
}

/// Format an OSI thousandths strike as a decimal string with at least two
/// fractional digits (`170000` -> `170.00`, `170500` -> `170.50`).
fn format_strike(millis: u64) -> String {
    let normalized = Decimal::new(i64::try_from(millis).unwrap_or(i64::MAX), 3).normalize();
    if normalized.scale() < 2 {
        format!("{normalized:.2}")
    } else {
        normalized.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
