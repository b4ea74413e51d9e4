//! In-process store backend.
//!
//! Used by tests and local runs. All tables sit behind one lock so a batch
//! is validated in full before any row is touched, which keeps
//! `upsert_rates` all-or-nothing like the database backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use fxquote_common::{
    now, quantize_rate, Currency, CurrencyCode, CurrencyPair, Quote, QuoteId, Rate, RateUpdate,
    Transaction,
};

use crate::error::{StoreError, StoreResult};
use crate::repository::Store;

#[derive(Default)]
struct Tables {
    currencies: HashMap<CurrencyCode, Currency>,
    rates: Vec<Rate>,
    quotes: HashMap<QuoteId, Quote>,
    transactions: Vec<Transaction>,
}

impl Tables {
    fn require_currency(&self, code: &CurrencyCode) -> StoreResult<()> {
        if self.currencies.contains_key(code) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey(format!("currency {} does not exist", code)))
        }
    }

    fn latest_index(&self, pair: &CurrencyPair) -> Option<usize> {
        self.rates
            .iter()
            .enumerate()
            .filter(|(_, rate)| &rate.pair == pair)
            .max_by_key(|(_, rate)| (rate.updated_at, rate.observed_at))
            .map(|(index, _)| index)
    }
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rate rows held, history included.
    pub fn rate_count(&self) -> usize {
        self.tables.read().rates.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_currency(&self, currency: &Currency) -> StoreResult<()> {
        self.tables
            .write()
            .currencies
            .insert(currency.code.clone(), currency.clone());
        Ok(())
    }

    async fn get_currency(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
        Ok(self.tables.read().currencies.get(code).cloned())
    }

    async fn enabled_currencies(&self) -> StoreResult<Vec<Currency>> {
        let tables = self.tables.read();
        let mut enabled: Vec<Currency> = tables
            .currencies
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(enabled)
    }

    async fn latest_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<Rate>> {
        let tables = self.tables.read();
        Ok(tables.latest_index(pair).map(|i| tables.rates[i].clone()))
    }

    async fn insert_rate(&self, rate: &Rate) -> StoreResult<Rate> {
        let mut tables = self.tables.write();
        tables.require_currency(&rate.pair.base)?;
        tables.require_currency(&rate.pair.target)?;

        let mut stored = rate.clone();
        stored.rate = quantize_rate(rate.rate);
        tables.rates.push(stored.clone());
        Ok(stored)
    }

    async fn upsert_rates(
        &self,
        base: &CurrencyCode,
        updates: &[RateUpdate],
    ) -> StoreResult<Vec<Rate>> {
        let mut tables = self.tables.write();

        tables.require_currency(base)?;
        for update in updates {
            tables.require_currency(&update.target)?;
        }

        let updated_at = now();
        let mut written = Vec::with_capacity(updates.len());

        for update in updates {
            let pair = CurrencyPair::new(base.clone(), update.target.clone());
            let row = Rate::new(
                pair.clone(),
                quantize_rate(update.rate),
                update.observed_at,
                updated_at,
            );

            match tables.latest_index(&pair) {
                Some(index) => tables.rates[index] = row.clone(),
                None => tables.rates.push(row.clone()),
            }
            written.push(row);
        }

        debug!(base = %base, count = written.len(), "Upserted rates");
        Ok(written)
    }

    async fn insert_quote(&self, quote: &Quote) -> StoreResult<Quote> {
        let mut tables = self.tables.write();
        tables.require_currency(&quote.from_currency)?;
        tables.require_currency(&quote.to_currency)?;

        if tables.quotes.contains_key(&quote.id) {
            return Err(StoreError::UniqueViolation(format!(
                "quote {} already exists",
                quote.id
            )));
        }
        tables.quotes.insert(quote.id, quote.clone());
        Ok(quote.clone())
    }

    async fn get_quote(&self, id: QuoteId) -> StoreResult<Option<Quote>> {
        Ok(self.tables.read().quotes.get(&id).cloned())
    }

    async fn transaction_exists(&self, quote_id: QuoteId, amount: Decimal) -> StoreResult<bool> {
        Ok(self
            .tables
            .read()
            .transactions
            .iter()
            .any(|t| t.quote_id == quote_id && t.amount == amount))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<Transaction> {
        let mut tables = self.tables.write();

        if !tables.quotes.contains_key(&transaction.quote_id) {
            return Err(StoreError::ForeignKey(format!(
                "quote {} does not exist",
                transaction.quote_id
            )));
        }
        if tables
            .transactions
            .iter()
            .any(|t| t.quote_id == transaction.quote_id && t.amount == transaction.amount)
        {
            return Err(StoreError::UniqueViolation(format!(
                "transaction for quote {} and amount {} already exists",
                transaction.quote_id, transaction.amount
            )));
        }

        tables.transactions.push(transaction.clone());
        Ok(transaction.clone())
    }

    async fn transactions_for_quote(&self, quote_id: QuoteId) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.read();
        let mut found: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|t| t.quote_id == quote_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn close(&self) {}
}
