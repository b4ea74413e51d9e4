//! Storage interface for FxQuote records.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use fxquote_common::{
    Currency, CurrencyCode, CurrencyPair, Quote, QuoteId, Rate, RateUpdate, Transaction,
};

use crate::error::StoreResult;

/// Durable source of truth for currencies, rates, quotes and transactions.
///
/// Rate writes here do not touch any cache. Callers that need the cache kept
/// in step write through the rate cache instead, which calls into the store
/// and then replaces the cached entry.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create or replace a currency record.
    async fn upsert_currency(&self, currency: &Currency) -> StoreResult<()>;

    /// Look up a currency by code.
    async fn get_currency(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>>;

    /// All enabled currencies, ordered by code.
    async fn enabled_currencies(&self) -> StoreResult<Vec<Currency>>;

    /// The most recently updated row for the ordered pair.
    async fn latest_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<Rate>>;

    /// Append a historical rate row exactly as given.
    async fn insert_rate(&self, rate: &Rate) -> StoreResult<Rate>;

    /// Upsert the current rate of `base -> update.target` for every update in
    /// one atomic transaction. Returns the persisted rows.
    async fn upsert_rates(
        &self,
        base: &CurrencyCode,
        updates: &[RateUpdate],
    ) -> StoreResult<Vec<Rate>>;

    /// Persist a new quote.
    async fn insert_quote(&self, quote: &Quote) -> StoreResult<Quote>;

    /// Look up a quote by ID.
    async fn get_quote(&self, id: QuoteId) -> StoreResult<Option<Quote>>;

    /// Whether a transaction already exists for the quote and amount.
    async fn transaction_exists(&self, quote_id: QuoteId, amount: Decimal) -> StoreResult<bool>;

    /// Persist a new transaction. Fails with `UniqueViolation` when one
    /// already exists for the same quote and amount.
    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<Transaction>;

    /// Transactions recorded against a quote, oldest first.
    async fn transactions_for_quote(&self, quote_id: QuoteId) -> StoreResult<Vec<Transaction>>;

    /// Release backend resources.
    async fn close(&self);
}

/// Shared store handle.
pub type SharedStore = Arc<dyn Store>;
