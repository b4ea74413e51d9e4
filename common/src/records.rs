//! Persisted records: rates, quotes and transactions.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CurrencyCode, CurrencyPair, QuoteId, Timestamp, TransactionId};

/// An observed exchange rate for an ordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// The ordered pair.
    pub pair: CurrencyPair,
    /// Units of target per unit of base.
    pub rate: Decimal,
    /// When the rate was true at the source.
    pub observed_at: Timestamp,
    /// When the row was last persisted.
    pub updated_at: Timestamp,
}

impl Rate {
    /// Create a rate record.
    pub fn new(
        pair: CurrencyPair,
        rate: Decimal,
        observed_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            pair,
            rate,
            observed_at,
            updated_at,
        }
    }

    /// Whether the rate was persisted within `window` of `now`.
    pub fn is_fresh_at(&self, now: Timestamp, window: Duration) -> bool {
        self.updated_at >= now - window
    }
}

/// New value for the current rate of `base -> target`, as written by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateUpdate {
    /// Target currency.
    pub target: CurrencyCode,
    /// New rate value.
    pub rate: Decimal,
    /// When the rate was true at the source.
    pub observed_at: Timestamp,
}

/// A priced conversion offer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub from_currency: CurrencyCode,
    pub to_currency: CurrencyCode,
    /// Requested amount in `from_currency`.
    pub amount: Decimal,
    /// Quantized amount in `to_currency`.
    pub converted_amount: Decimal,
    /// Effective rate snapshot.
    pub rate: Decimal,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Quote {
    /// Create a quote valid for `ttl` from `created_at`.
    pub fn new(
        from_currency: CurrencyCode,
        to_currency: CurrencyCode,
        amount: Decimal,
        converted_amount: Decimal,
        rate: Decimal,
        created_at: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self {
            id: QuoteId::new(),
            from_currency,
            to_currency,
            amount,
            converted_amount,
            rate,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Whether the quote can no longer be transacted at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Settlement of a quote. At most one per `(quote_id, amount)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub quote_id: QuoteId,
    pub amount: Decimal,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Transaction {
    /// Create a new transaction stamped at `now`.
    pub fn new(quote_id: QuoteId, amount: Decimal, now: Timestamp) -> Self {
        Self {
            id: TransactionId::new(),
            quote_id,
            amount,
            created_at: now,
            updated_at: now,
        }
    }
}
