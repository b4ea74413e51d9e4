//! Scheduled rate ingestion from the external provider.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use fxquote_common::{
    now, parse_decimal, CurrencyCode, RateUpdate, Timestamp,
};
use fxquote_store::SharedStore;

use crate::cache::RateCache;
use crate::error::{FxError, FxResult, ProviderError};
use crate::provider::{ProviderRequest, RateProvider};
use crate::retry::RetryPolicy;

/// Configuration for the ingestion job.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Currency the snapshot is requested against.
    pub base_currency: CurrencyCode,
    /// Provider credential, sent when set.
    pub access_key: Option<String>,
}

/// Why a run did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Base currency missing or disabled.
    BaseCurrencyUnavailable(CurrencyCode),
    /// No enabled currency besides the base.
    NoTargets,
}

/// Result of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// Nothing was fetched.
    Skipped { reason: SkipReason },
    /// Rates were fetched and persisted.
    Refreshed {
        base: CurrencyCode,
        observed_at: Timestamp,
        /// Rows upserted.
        updated: usize,
        /// Enabled targets whose value could not be parsed.
        skipped: usize,
    },
}

/// Fetches a rate snapshot and refreshes the store and cache in one batch.
pub struct RateIngestionJob {
    store: SharedStore,
    rates: Arc<RateCache>,
    provider: Arc<dyn RateProvider>,
    retry: RetryPolicy,
    config: IngestionConfig,
}

impl RateIngestionJob {
    /// Create a new ingestion job.
    pub fn new(
        store: SharedStore,
        rates: Arc<RateCache>,
        provider: Arc<dyn RateProvider>,
        retry: RetryPolicy,
        config: IngestionConfig,
    ) -> Self {
        Self {
            store,
            rates,
            provider,
            retry,
            config,
        }
    }

    /// Run one ingestion pass.
    #[instrument(skip(self), fields(base = %self.config.base_currency, provider = self.provider.name()))]
    pub async fn run(&self) -> FxResult<IngestionOutcome> {
        let base_code = &self.config.base_currency;

        let base = match self.store.get_currency(base_code).await? {
            Some(base) if base.enabled => base,
            _ => {
                warn!("Base currency is not configured or not enabled; skipping rates fetch");
                return Ok(IngestionOutcome::Skipped {
                    reason: SkipReason::BaseCurrencyUnavailable(base_code.clone()),
                });
            }
        };

        let targets: BTreeSet<CurrencyCode> = self
            .store
            .enabled_currencies()
            .await?
            .into_iter()
            .map(|c| c.code)
            .filter(|code| code != &base.code)
            .collect();

        if targets.is_empty() {
            info!("No enabled target currencies configured; nothing to update");
            return Ok(IngestionOutcome::Skipped {
                reason: SkipReason::NoTargets,
            });
        }

        let request = ProviderRequest::new(
            base.code.clone(),
            targets.iter().cloned().collect(),
            self.config.access_key.clone(),
        );

        let payload = self
            .retry
            .run(
                "rates.fetch",
                |attempt| {
                    debug!(attempt, "Fetching rates");
                    self.provider.fetch(&request)
                },
                ProviderError::is_retryable,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch exchange rates");
                FxError::Provider(e)
            })?;

        let observed_at = payload.observed_at(now());
        let mut updates = Vec::new();
        let mut skipped = 0;

        for (raw_code, value) in &payload.rates {
            let Some(target) = CurrencyCode::parse(raw_code)
                .ok()
                .filter(|code| targets.contains(code))
            else {
                continue;
            };

            match rate_value(value) {
                Some(rate) => updates.push(RateUpdate {
                    target,
                    rate,
                    observed_at,
                }),
                None => {
                    warn!(currency = %target, value = %value, "Skipping rate due to invalid value");
                    skipped += 1;
                }
            }
        }

        let written = self.rates.upsert_rates(&base.code, &updates).await?;

        for rate in &written {
            info!(
                event = "rate.updated",
                base_currency = %rate.pair.base,
                target_currency = %rate.pair.target,
                rate = %rate.rate,
                timestamp = %rate.observed_at.to_rfc3339(),
                "Rate updated"
            );
        }

        info!(
            observed_at = %observed_at.to_rfc3339(),
            updated = written.len(),
            skipped,
            "Exchange rates refreshed"
        );

        Ok(IngestionOutcome::Refreshed {
            base: base.code,
            observed_at,
            updated: written.len(),
            skipped,
        })
    }
}

fn rate_value(value: &Value) -> Option<rust_decimal::Decimal> {
    match value {
        Value::String(s) => parse_decimal(s).ok(),
        Value::Number(n) => parse_decimal(&n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateCacheConfig;
    use crate::provider::MockRateProvider;
    use chrono::{TimeZone, Utc};
    use fxquote_common::{Currency, CurrencyPair, Rate};
    use fxquote_store::{CacheStore, MemoryCache, MemoryStore, Store};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).unwrap()
    }

    struct Fixture {
        cache: Arc<MemoryCache>,
        store: Arc<MemoryStore>,
        rates: Arc<RateCache>,
        provider: Arc<MockRateProvider>,
        job: RateIngestionJob,
    }

    async fn setup(currencies: &[(&str, bool)]) -> Fixture {
        let cache = Arc::new(MemoryCache::connected());
        let store = Arc::new(MemoryStore::new());
        for (c, enabled) in currencies {
            let mut currency = Currency::new(code(c), *c, 4);
            currency.enabled = *enabled;
            store.upsert_currency(&currency).await.unwrap();
        }
        let rates = Arc::new(RateCache::new(
            cache.clone(),
            store.clone(),
            RateCacheConfig::default(),
        ));
        let provider = Arc::new(MockRateProvider::new("mock"));
        let retry =
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)).without_jitter();
        let job = RateIngestionJob::new(
            store.clone(),
            rates.clone(),
            provider.clone(),
            retry,
            IngestionConfig {
                base_currency: code("EUR"),
                access_key: Some("key".into()),
            },
        );
        Fixture {
            cache,
            store,
            rates,
            provider,
            job,
        }
    }

    async fn standard() -> Fixture {
        setup(&[
            ("EUR", true),
            ("USD", true),
            ("GBP", true),
            ("CHF", true),
            ("JPY", false),
        ])
        .await
    }

    #[tokio::test]
    async fn test_skips_invalid_values_and_unknown_codes() {
        let f = standard().await;
        let eur_gbp = CurrencyPair::new(code("EUR"), code("GBP"));
        let earlier = fxquote_common::now() - chrono::Duration::minutes(30);
        let prior = f
            .rates
            .record_rate(&Rate::new(eur_gbp.clone(), dec!(0.86), earlier, earlier))
            .await
            .unwrap();
        let prior_payload = f.cache.get("rate_EUR_GBP").await.unwrap().unwrap();

        f.provider.respond(json!({
            "timestamp": 1_700_000_000,
            "rates": {"USD": 1.1, "GBP": "abc", "JPY": 150, "XXX": 2, "CHF": "0.95"}
        }));

        let outcome = f.job.run().await.unwrap();

        assert_eq!(
            outcome,
            IngestionOutcome::Refreshed {
                base: code("EUR"),
                observed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                updated: 2,
                skipped: 1,
            }
        );

        let usd = f
            .store
            .latest_rate(&CurrencyPair::new(code("EUR"), code("USD")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usd.rate, dec!(1.1));

        let gbp = f.store.latest_rate(&eur_gbp).await.unwrap().unwrap();
        assert_eq!(gbp, prior);
        assert_eq!(gbp.rate, dec!(0.86));
        assert_eq!(gbp.updated_at, earlier);
        assert_eq!(
            f.cache.get("rate_EUR_GBP").await.unwrap().unwrap(),
            prior_payload
        );
        assert!(f.cache.get("rate_EUR_CHF").await.unwrap().is_some());

        let request = &f.provider.requests()[0];
        assert_eq!(
            request.query_pairs()[1],
            ("symbols", "CHF,GBP,USD".to_string())
        );
        assert_eq!(request.access_key.as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn test_repeat_run_updates_current_row() {
        let f = standard().await;
        f.provider
            .respond(json!({"rates": {"USD": 1.1}}))
            .respond(json!({"rates": {"USD": 1.2}}));

        f.job.run().await.unwrap();
        f.job.run().await.unwrap();

        assert_eq!(f.store.rate_count(), 1);
        let usd = f
            .store
            .latest_rate(&CurrencyPair::new(code("EUR"), code("USD")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usd.rate, dec!(1.2));
    }

    #[tokio::test]
    async fn test_skips_when_base_unavailable() {
        let f = setup(&[("EUR", false), ("USD", true)]).await;

        let outcome = f.job.run().await.unwrap();

        assert_eq!(
            outcome,
            IngestionOutcome::Skipped {
                reason: SkipReason::BaseCurrencyUnavailable(code("EUR"))
            }
        );
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_skips_without_targets() {
        let f = setup(&[("EUR", true), ("USD", false)]).await;

        let outcome = f.job.run().await.unwrap();

        assert_eq!(
            outcome,
            IngestionOutcome::Skipped {
                reason: SkipReason::NoTargets
            }
        );
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let f = standard().await;
        f.provider
            .fail(ProviderError::Transport("connection reset".into()))
            .respond(json!({"success": false}))
            .respond(json!({"rates": {"USD": "1.05"}}));

        let outcome = f.job.run().await.unwrap();

        assert!(matches!(outcome, IngestionOutcome::Refreshed { updated: 1, .. }));
        assert_eq!(f.provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_provider_error() {
        let f = standard().await;
        f.provider
            .fail(ProviderError::Status(502))
            .respond(json!({"error": {"message": "rate limited"}}))
            .fail(ProviderError::Status(503));

        let err = f.job.run().await.unwrap_err();

        assert!(matches!(err, FxError::Provider(ProviderError::Status(503))));
        assert_eq!(f.provider.requests().len(), 3);
        assert_eq!(f.store.rate_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_retried() {
        let f = standard().await;
        f.provider
            .fail(ProviderError::InvalidRequest("bad url".into()));

        assert!(f.job.run().await.is_err());
        assert_eq!(f.provider.requests().len(), 1);
    }
}
