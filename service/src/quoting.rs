//! Quote and transaction operations consumed by the routing layer.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use fxquote_common::{
    now, parse_decimal, FxQuoteError, FxQuoteResult, Quote, QuoteId, Transaction,
};
use fxquote_fx::{Conversion, ConversionEngine};
use fxquote_store::SharedStore;

use crate::idempotency::{Execution, IdempotencyCache, IdempotentResponse};
use crate::metrics::SharedMetrics;

const QUOTE_EXPIRED: &str = "Quote has expired.";
const AMOUNT_MISMATCH: &str = "Transaction amount must match the original quoted amount.";
const DUPLICATE_TRANSACTION: &str = "A transaction for this quote and amount already exists.";

/// Request to price a conversion and persist it as a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQuote {
    pub from_currency: String,
    pub to_currency: String,
    pub amount: String,
}

/// Request to settle a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransaction {
    pub quote_id: String,
    pub amount: String,
}

/// Quote creation and transaction validation, both idempotency-guarded.
pub struct QuoteService {
    store: SharedStore,
    engine: Arc<ConversionEngine>,
    idempotency: Arc<IdempotencyCache>,
    metrics: SharedMetrics,
    quote_ttl: Duration,
}

impl QuoteService {
    /// Create a quote service.
    pub fn new(
        store: SharedStore,
        engine: Arc<ConversionEngine>,
        idempotency: Arc<IdempotencyCache>,
        metrics: SharedMetrics,
        quote_ttl: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            idempotency,
            metrics,
            quote_ttl,
        }
    }

    /// Convert an amount without persisting anything.
    pub async fn convert(&self, amount: &str, from: &str, to: &str) -> FxQuoteResult<Conversion> {
        match self.engine.convert(amount, from, to).await {
            Ok(conversion) => {
                self.metrics.conversion_completed();
                Ok(conversion)
            }
            Err(e) => {
                self.metrics.conversion_failed();
                warn!(from, to, error = %e, "Conversion failed");
                Err(e.into())
            }
        }
    }

    /// Price and persist a quote under an idempotency token.
    #[instrument(skip(self, request), fields(from = %request.from_currency, to = %request.to_currency))]
    pub async fn create_quote(
        &self,
        token: Option<&str>,
        request: CreateQuote,
    ) -> FxQuoteResult<IdempotentResponse> {
        let (response, execution) = self
            .idempotency
            .execute(token, || async {
                respond(self.persist_quote(&request).await)
            })
            .await?;

        self.note_replay(execution);
        Ok(response)
    }

    /// Validate a transaction against its quote and persist it under an
    /// idempotency token.
    #[instrument(skip(self, request), fields(quote_id = %request.quote_id))]
    pub async fn validate_and_create(
        &self,
        token: Option<&str>,
        request: CreateTransaction,
    ) -> FxQuoteResult<IdempotentResponse> {
        let (response, execution) = self
            .idempotency
            .execute(token, || async {
                respond(self.persist_transaction(&request).await)
            })
            .await?;

        self.note_replay(execution);
        Ok(response)
    }

    async fn persist_quote(&self, request: &CreateQuote) -> FxQuoteResult<Quote> {
        let conversion = self
            .convert(&request.amount, &request.from_currency, &request.to_currency)
            .await?;

        let quote = Quote::new(
            conversion.from,
            conversion.to,
            conversion.amount,
            conversion.converted_amount,
            conversion.rate,
            now(),
            self.quote_ttl,
        );
        let stored = self.store.insert_quote(&quote).await?;

        self.metrics.quote_created();
        info!(
            quote_id = %stored.id,
            converted_amount = %stored.converted_amount,
            expires_at = %stored.expires_at,
            "Quote created"
        );
        Ok(stored)
    }

    async fn persist_transaction(&self, request: &CreateTransaction) -> FxQuoteResult<Transaction> {
        let quote_id = QuoteId::parse(request.quote_id.trim())
            .map_err(|_| FxQuoteError::invalid_field("quote", "Invalid quote id."))?;
        let amount = parse_decimal(&request.amount)
            .map_err(|_| FxQuoteError::invalid_field("amount", "A valid number is required."))?;

        let quote = self
            .store
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| FxQuoteError::NotFound(format!("Quote {} does not exist", quote_id)))?;

        let now = now();
        if quote.is_expired_at(now) {
            return Err(FxQuoteError::invalid_field("quote", QUOTE_EXPIRED));
        }

        if amount != quote.amount {
            return Err(FxQuoteError::invalid_field("amount", AMOUNT_MISMATCH));
        }

        if self.store.transaction_exists(quote.id, amount).await? {
            self.metrics.transaction_conflict();
            return Err(FxQuoteError::Conflict(DUPLICATE_TRANSACTION.to_string()));
        }

        let transaction = Transaction::new(quote.id, amount, now);
        let stored = match self.store.insert_transaction(&transaction).await {
            Ok(stored) => stored,
            Err(e) if e.is_unique_violation() => {
                self.metrics.transaction_conflict();
                return Err(FxQuoteError::Conflict(DUPLICATE_TRANSACTION.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        self.metrics.transaction_created();
        info!(transaction_id = %stored.id, amount = %stored.amount, "Transaction created");
        Ok(stored)
    }

    fn note_replay(&self, execution: Execution) {
        if execution == Execution::Replayed {
            self.metrics.idempotent_replay();
        }
    }
}

fn respond<T: Serialize>(result: FxQuoteResult<T>) -> IdempotentResponse {
    let encoded = result.and_then(|value| {
        serde_json::to_value(&value).map_err(|e| FxQuoteError::Internal(e.to_string()))
    });

    match encoded {
        Ok(body) => IdempotentResponse::created(body),
        Err(e) => IdempotentResponse::from_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use async_trait::async_trait;
    use fxquote_common::{
        Currency, CurrencyCode, CurrencyPair, Rate, RateUpdate,
    };
    use fxquote_fx::{EngineConfig, RateCache, RateCacheConfig};
    use fxquote_store::{MemoryCache, MemoryStore, Store, StoreResult};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).unwrap()
    }

    /// Store whose duplicate pre-check never sees a concurrent insert.
    struct RacyStore(Arc<MemoryStore>);

    #[async_trait]
    impl Store for RacyStore {
        async fn upsert_currency(&self, currency: &Currency) -> StoreResult<()> {
            self.0.upsert_currency(currency).await
        }
        async fn get_currency(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
            self.0.get_currency(code).await
        }
        async fn enabled_currencies(&self) -> StoreResult<Vec<Currency>> {
            self.0.enabled_currencies().await
        }
        async fn latest_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<Rate>> {
            self.0.latest_rate(pair).await
        }
        async fn insert_rate(&self, rate: &Rate) -> StoreResult<Rate> {
            self.0.insert_rate(rate).await
        }
        async fn upsert_rates(
            &self,
            base: &CurrencyCode,
            updates: &[RateUpdate],
        ) -> StoreResult<Vec<Rate>> {
            self.0.upsert_rates(base, updates).await
        }
        async fn insert_quote(&self, quote: &Quote) -> StoreResult<Quote> {
            self.0.insert_quote(quote).await
        }
        async fn get_quote(&self, id: QuoteId) -> StoreResult<Option<Quote>> {
            self.0.get_quote(id).await
        }
        async fn transaction_exists(&self, _: QuoteId, _: Decimal) -> StoreResult<bool> {
            Ok(false)
        }
        async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<Transaction> {
            self.0.insert_transaction(transaction).await
        }
        async fn transactions_for_quote(&self, quote_id: QuoteId) -> StoreResult<Vec<Transaction>> {
            self.0.transactions_for_quote(quote_id).await
        }
        async fn close(&self) {}
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        metrics: SharedMetrics,
        service: QuoteService,
    }

    async fn setup_with(store: Arc<MemoryStore>, shared: SharedStore) -> Fixture {
        for c in ["EUR", "USD", "GBP"] {
            store
                .upsert_currency(&Currency::new(code(c), c, 4))
                .await
                .unwrap();
        }
        let t = now();
        for (target, rate) in [("USD", dec!(0.9)), ("GBP", dec!(0.8))] {
            store
                .insert_rate(&Rate::new(CurrencyPair::new(code("EUR"), code(target)), rate, t, t))
                .await
                .unwrap();
        }

        let cache = Arc::new(MemoryCache::connected());
        let rates = Arc::new(RateCache::new(
            cache.clone(),
            shared.clone(),
            RateCacheConfig::default(),
        ));
        let engine = Arc::new(ConversionEngine::new(
            shared.clone(),
            rates,
            EngineConfig::with_base("EUR").unwrap(),
        ));
        let idempotency = Arc::new(IdempotencyCache::new(cache, Duration::hours(24)));
        let metrics = Arc::new(Metrics::new());
        let service = QuoteService::new(
            shared,
            engine,
            idempotency,
            metrics.clone(),
            Duration::minutes(10),
        );

        Fixture {
            store,
            metrics,
            service,
        }
    }

    async fn setup() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        setup_with(store.clone(), store).await
    }

    fn quote_request() -> CreateQuote {
        CreateQuote {
            from_currency: "USD".into(),
            to_currency: "GBP".into(),
            amount: "90".into(),
        }
    }

    async fn create_quote(f: &Fixture) -> Quote {
        let response = f
            .service
            .create_quote(Some("quote-1"), quote_request())
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        serde_json::from_value(response.body).unwrap()
    }

    fn transaction_request(quote: &Quote, amount: &str) -> CreateTransaction {
        CreateTransaction {
            quote_id: quote.id.to_string(),
            amount: amount.into(),
        }
    }

    #[tokio::test]
    async fn test_quote_replay_returns_identical_body() {
        let f = setup().await;

        let first = f
            .service
            .create_quote(Some("quote-1"), quote_request())
            .await
            .unwrap();
        let second = f
            .service
            .create_quote(Some("quote-1"), quote_request())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.body["converted_amount"], "80.0000");
        assert_eq!(f.metrics.snapshot().quotes_created, 1);
        assert_eq!(f.metrics.snapshot().idempotent_replays, 1);
    }

    #[tokio::test]
    async fn test_quote_requires_token() {
        let f = setup().await;
        let err = f.service.create_quote(None, quote_request()).await.unwrap_err();
        assert_eq!(err, FxQuoteError::IdempotencyKeyMissing);
    }

    #[tokio::test]
    async fn test_quote_with_unknown_currency_is_not_found() {
        let f = setup().await;
        let request = CreateQuote {
            to_currency: "XYZ".into(),
            ..quote_request()
        };

        let response = f.service.create_quote(Some("q"), request).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(f.metrics.snapshot().conversions_failed, 1);
    }

    #[tokio::test]
    async fn test_transaction_created_once() {
        let f = setup().await;
        let quote = create_quote(&f).await;

        let created = f
            .service
            .validate_and_create(Some("tx-1"), transaction_request(&quote, "90"))
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.body["quote_id"], quote.id.to_string());

        let replayed = f
            .service
            .validate_and_create(Some("tx-1"), transaction_request(&quote, "90"))
            .await
            .unwrap();
        assert_eq!(replayed, created);

        let duplicate = f
            .service
            .validate_and_create(Some("tx-2"), transaction_request(&quote, "90.00"))
            .await
            .unwrap();
        assert_eq!(duplicate.status, 409);
        assert_eq!(duplicate.body["message"], format!("Conflict: {}", DUPLICATE_TRANSACTION));

        assert_eq!(f.store.transactions_for_quote(quote.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_validation_errors() {
        let f = setup().await;
        let quote = create_quote(&f).await;

        let mismatch = f
            .service
            .validate_and_create(Some("tx-1"), transaction_request(&quote, "80"))
            .await
            .unwrap();
        assert_eq!(mismatch.status, 400);
        assert_eq!(mismatch.body["field"], "amount");

        let unknown = CreateTransaction {
            quote_id: QuoteId::new().to_string(),
            amount: "90".into(),
        };
        let missing = f
            .service
            .validate_and_create(Some("tx-2"), unknown)
            .await
            .unwrap();
        assert_eq!(missing.status, 404);

        let malformed = CreateTransaction {
            quote_id: "nope".into(),
            amount: "90".into(),
        };
        let invalid = f
            .service
            .validate_and_create(Some("tx-3"), malformed)
            .await
            .unwrap();
        assert_eq!(invalid.body["field"], "quote");
    }

    #[tokio::test]
    async fn test_expired_quote_is_rejected() {
        let f = setup().await;
        let created = now() - Duration::minutes(20);
        let quote = Quote::new(
            code("USD"),
            code("GBP"),
            dec!(90),
            dec!(80),
            dec!(0.8889),
            created,
            Duration::minutes(10),
        );
        f.store.insert_quote(&quote).await.unwrap();

        let response = f
            .service
            .validate_and_create(Some("tx-1"), transaction_request(&quote, "90"))
            .await
            .unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(response.body["field"], "quote");
        assert_eq!(response.body["message"], format!("Invalid input: {}", QUOTE_EXPIRED));
    }

    #[tokio::test]
    async fn test_racing_insert_maps_to_conflict() {
        let store = Arc::new(MemoryStore::new());
        let f = setup_with(store.clone(), Arc::new(RacyStore(store))).await;
        let quote = create_quote(&f).await;

        f.service
            .validate_and_create(Some("tx-1"), transaction_request(&quote, "90"))
            .await
            .unwrap();
        let raced = f
            .service
            .validate_and_create(Some("tx-2"), transaction_request(&quote, "90"))
            .await
            .unwrap();

        assert_eq!(raced.status, 409);
        assert_eq!(f.metrics.snapshot().transaction_conflicts, 1);
        assert_eq!(f.store.transactions_for_quote(quote.id).await.unwrap().len(), 1);
    }
}
