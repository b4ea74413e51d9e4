//! Currency types and decimal arithmetic helpers.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits of the persisted rate field.
pub const RATE_DECIMAL_PLACES: u32 = 4;

/// Fractional digits given to a currency when none are specified.
pub const DEFAULT_DECIMAL_PLACES: u32 = 4;

/// Longest currency code accepted.
pub const MAX_CODE_LEN: usize = 8;

/// Rejected currency code input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCurrencyCode {
    /// Blank or whitespace-only code.
    #[error("Currency codes must be provided")]
    Empty,

    /// Code containing anything but ASCII letters.
    #[error("Currency code '{0}' must be alphabetic")]
    NotAlphabetic(String),

    /// Code longer than [`MAX_CODE_LEN`].
    #[error("Currency code '{0}' is too long")]
    TooLong(String),
}

/// Canonical (trimmed, upper-case) currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Canonicalize and validate a raw code.
    pub fn parse(raw: &str) -> Result<Self, InvalidCurrencyCode> {
        let canonical = raw.trim().to_uppercase();

        if canonical.is_empty() {
            return Err(InvalidCurrencyCode::Empty);
        }
        if !canonical.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(InvalidCurrencyCode::NotAlphabetic(canonical));
        }
        if canonical.len() > MAX_CODE_LEN {
            return Err(InvalidCurrencyCode::TooLong(canonical));
        }

        Ok(Self(canonical))
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = InvalidCurrencyCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = InvalidCurrencyCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// A currency known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Unique code.
    pub code: CurrencyCode,
    /// Display name.
    pub name: String,
    /// Fractional digits used when quantizing amounts in this currency.
    pub decimal_places: u32,
    /// Whether the currency takes part in rate ingestion and triangulation.
    pub enabled: bool,
}

impl Currency {
    /// Create an enabled currency.
    pub fn new(code: CurrencyCode, name: impl Into<String>, decimal_places: u32) -> Self {
        Self {
            code,
            name: name.into(),
            decimal_places,
            enabled: true,
        }
    }

    /// Mark the currency as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Quantize an amount to this currency's precision.
    pub fn quantize(&self, value: Decimal) -> Decimal {
        quantize(value, self.decimal_places)
    }
}

/// An ordered currency pair: one unit of `base` is worth `rate` units of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency.
    pub base: CurrencyCode,
    /// Target currency.
    pub target: CurrencyCode,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: CurrencyCode, target: CurrencyCode) -> Self {
        Self { base, target }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.target.clone(),
            target: self.base.clone(),
        }
    }

    /// Deterministic cache key for this ordered pair.
    pub fn cache_key(&self) -> String {
        format!("rate_{}_{}", self.base, self.target)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

/// Round half-up (away from zero) to `decimal_places` digits, padding the scale.
pub fn quantize(value: Decimal, decimal_places: u32) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimal_places);
    rounded
}

/// Quantize a rate to the persisted rate precision.
pub fn quantize_rate(value: Decimal) -> Decimal {
    quantize(value, RATE_DECIMAL_PLACES)
}

/// Parse a decimal from user or provider input.
///
/// Plain notation is tried first, then scientific notation.
pub fn parse_decimal(input: &str) -> Result<Decimal, rust_decimal::Error> {
    let trimmed = input.trim();
    Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))
}
