//! Currency conversion engine.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use fxquote_common::{
    parse_decimal, quantize_rate, Currency, CurrencyCode, CurrencyPair, Rate,
};
use fxquote_store::SharedStore;

use crate::cache::RateCache;
use crate::conversion::{Conversion, ConversionPath};
use crate::error::{FxError, FxResult};

/// Configuration for the conversion engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Pivot currency used to triangulate when neither the direct nor the
    /// inverse rate exists.
    pub base_currency: Option<CurrencyCode>,
}

impl EngineConfig {
    /// Configure a base currency from a raw code.
    pub fn with_base(code: &str) -> FxResult<Self> {
        let base = CurrencyCode::parse(code).map_err(|e| FxError::InvalidInput(e.to_string()))?;
        Ok(Self {
            base_currency: Some(base),
        })
    }
}

/// Resolves amounts between currencies against the rate cache.
pub struct ConversionEngine {
    store: SharedStore,
    rates: Arc<RateCache>,
    config: EngineConfig,
}

impl ConversionEngine {
    /// Create a new engine.
    pub fn new(store: SharedStore, rates: Arc<RateCache>, config: EngineConfig) -> Self {
        Self {
            store,
            rates,
            config,
        }
    }

    /// Get the configured base currency.
    pub fn base_currency(&self) -> Option<&CurrencyCode> {
        self.config.base_currency.as_ref()
    }

    /// Convert a raw amount between two raw currency codes.
    #[instrument(skip(self))]
    pub async fn convert(&self, amount: &str, from: &str, to: &str) -> FxResult<Conversion> {
        let from = parse_code(from)?;
        let to = parse_code(to)?;
        let amount = parse_decimal(amount).map_err(|_| {
            FxError::InvalidInput(format!("Amount '{}' is not a valid number", amount.trim()))
        })?;

        self.convert_amount(amount, &from, &to).await
    }

    /// Convert a parsed amount between two currencies.
    pub async fn convert_amount(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> FxResult<Conversion> {
        let from_currency = self.currency(from).await?;
        let to_currency = self.currency(to).await?;
        let pair = CurrencyPair::new(from.clone(), to.clone());

        let (converted, rate, path) = if from == to {
            (amount, Decimal::ONE, ConversionPath::Identity)
        } else {
            self.resolve(amount, &from_currency, &pair).await?
        };

        let conversion = Conversion {
            from: from.clone(),
            to: to.clone(),
            amount,
            converted_amount: to_currency.quantize(converted),
            rate: quantize_rate(rate),
            path,
        };

        info!(
            from = %conversion.from,
            to = %conversion.to,
            amount = %conversion.amount,
            converted_amount = %conversion.converted_amount,
            rate = %conversion.rate,
            path = %conversion.path,
            "Conversion completed"
        );

        Ok(conversion)
    }

    /// Returns the unquantized result and the effective rate.
    async fn resolve(
        &self,
        amount: Decimal,
        from: &Currency,
        pair: &CurrencyPair,
    ) -> FxResult<(Decimal, Decimal, ConversionPath)> {
        if let Some(direct) = self.rates.get(pair).await? {
            let rate = nonzero(&direct)?;
            let converted = amount
                .checked_mul(rate)
                .ok_or_else(|| FxError::Overflow(pair.clone()))?;
            return Ok((converted, rate, ConversionPath::Direct));
        }

        let inverse_pair = pair.inverse();
        if let Some(inverse) = self.rates.get(&inverse_pair).await? {
            let rate = nonzero(&inverse)?;
            let converted = amount
                .checked_div(rate)
                .ok_or_else(|| FxError::Overflow(pair.clone()))?;
            let effective = reciprocal(rate, pair)?;
            return Ok((converted, effective, ConversionPath::Inverse));
        }

        debug!(pair = %pair, "No direct or inverse rate, triangulating");
        self.triangulate(amount, from, pair).await
    }

    async fn triangulate(
        &self,
        amount: Decimal,
        from: &Currency,
        pair: &CurrencyPair,
    ) -> FxResult<(Decimal, Decimal, ConversionPath)> {
        let base = self.base().await?;

        let (amount_in_base, accumulated) = if from.code == base.code {
            (amount, Decimal::ONE)
        } else {
            let leg = CurrencyPair::new(base.code.clone(), from.code.clone());
            let rate = self.required_rate(&leg).await?;
            let in_base = amount
                .checked_div(rate)
                .ok_or_else(|| FxError::Overflow(pair.clone()))?;
            (in_base, reciprocal(rate, pair)?)
        };

        if pair.target == base.code {
            return Ok((amount_in_base, accumulated, ConversionPath::Triangulated));
        }

        let leg = CurrencyPair::new(base.code.clone(), pair.target.clone());
        let rate = self.required_rate(&leg).await?;
        let converted = amount_in_base
            .checked_mul(rate)
            .ok_or_else(|| FxError::Overflow(pair.clone()))?;
        let effective = accumulated
            .checked_mul(rate)
            .ok_or_else(|| FxError::Overflow(pair.clone()))?;

        Ok((converted, effective, ConversionPath::Triangulated))
    }

    async fn required_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        match self.rates.get(pair).await? {
            Some(rate) => nonzero(&rate),
            None => Err(FxError::RateNotAvailable(pair.clone())),
        }
    }

    async fn currency(&self, code: &CurrencyCode) -> FxResult<Currency> {
        self.store
            .get_currency(code)
            .await?
            .ok_or_else(|| FxError::CurrencyNotFound(code.clone()))
    }

    async fn base(&self) -> FxResult<Currency> {
        let code = self
            .config
            .base_currency
            .as_ref()
            .ok_or(FxError::BaseCurrencyNotConfigured)?;

        match self.store.get_currency(code).await? {
            Some(base) if base.enabled => Ok(base),
            _ => Err(FxError::BaseCurrencyNotConfigured),
        }
    }
}

fn parse_code(raw: &str) -> FxResult<CurrencyCode> {
    CurrencyCode::parse(raw).map_err(|e| FxError::InvalidInput(e.to_string()))
}

fn nonzero(rate: &Rate) -> FxResult<Decimal> {
    if rate.rate.is_zero() {
        Err(FxError::ZeroRate(rate.pair.clone()))
    } else {
        Ok(rate.rate)
    }
}

fn reciprocal(rate: Decimal, pair: &CurrencyPair) -> FxResult<Decimal> {
    Decimal::ONE
        .checked_div(rate)
        .ok_or_else(|| FxError::Overflow(pair.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateCacheConfig;
    use chrono::Duration;
    use fxquote_common::{now, quantize};
    use fxquote_store::{CacheStore, MemoryCache, MemoryStore, Store};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).unwrap()
    }

    fn pair(base: &str, target: &str) -> CurrencyPair {
        CurrencyPair::new(code(base), code(target))
    }

    struct Fixture {
        cache: Arc<MemoryCache>,
        store: Arc<MemoryStore>,
        rates: Arc<RateCache>,
        engine: ConversionEngine,
    }

    impl Fixture {
        async fn rate(&self, base: &str, target: &str, rate: Decimal) {
            let t = now();
            self.rates
                .record_rate(&Rate::new(pair(base, target), rate, t, t))
                .await
                .unwrap();
        }

        async fn stale_rate(&self, base: &str, target: &str, rate: Decimal) {
            let t = now() - Duration::hours(2);
            self.store
                .insert_rate(&Rate::new(pair(base, target), rate, t, t))
                .await
                .unwrap();
        }
    }

    async fn setup_with(config: EngineConfig) -> Fixture {
        let cache = Arc::new(MemoryCache::connected());
        let store = Arc::new(MemoryStore::new());
        for (c, dp) in [("EUR", 4), ("USD", 4), ("GBP", 4), ("JPY", 0), ("CHF", 2)] {
            store
                .upsert_currency(&Currency::new(code(c), c, dp))
                .await
                .unwrap();
        }
        let rates = Arc::new(RateCache::new(
            cache.clone(),
            store.clone(),
            RateCacheConfig::default(),
        ));
        let engine = ConversionEngine::new(store.clone(), rates.clone(), config);
        Fixture {
            cache,
            store,
            rates,
            engine,
        }
    }

    async fn setup() -> Fixture {
        let fixture = setup_with(EngineConfig::with_base("EUR").unwrap()).await;
        fixture.rate("EUR", "USD", dec!(0.9)).await;
        fixture.rate("EUR", "GBP", dec!(0.8)).await;
        fixture
    }

    #[tokio::test]
    async fn test_triangulates_via_base() {
        let f = setup().await;

        let conversion = f.engine.convert("90", "USD", "GBP").await.unwrap();

        assert_eq!(conversion.converted_amount.to_string(), "80.0000");
        assert_eq!(conversion.rate, dec!(0.8889));
        assert_eq!(conversion.path, ConversionPath::Triangulated);
    }

    #[tokio::test]
    async fn test_identity_quantizes() {
        let f = setup().await;

        let conversion = f.engine.convert("9.123456", "usd", " USD ").await.unwrap();

        assert_eq!(conversion.converted_amount, dec!(9.1235));
        assert_eq!(conversion.rate.to_string(), "1.0000");
        assert_eq!(conversion.path, ConversionPath::Identity);
    }

    #[tokio::test]
    async fn test_direct_and_inverse() {
        let f = setup().await;

        let direct = f.engine.convert("100", "EUR", "USD").await.unwrap();
        assert_eq!(direct.converted_amount, dec!(90));
        assert_eq!(direct.path, ConversionPath::Direct);

        let inverse = f.engine.convert("90", "USD", "EUR").await.unwrap();
        assert_eq!(inverse.converted_amount, dec!(100));
        assert_eq!(inverse.rate, dec!(1.1111));
        assert_eq!(inverse.path, ConversionPath::Inverse);
    }

    #[tokio::test]
    async fn test_integer_currency_rounds_half_up() {
        let f = setup().await;
        f.rate("EUR", "JPY", dec!(160.5)).await;

        let conversion = f.engine.convert("1.5", "EUR", "JPY").await.unwrap();
        assert_eq!(conversion.converted_amount.to_string(), "241");
    }

    #[tokio::test]
    async fn test_stale_direct_rate_fails() {
        let f = setup_with(EngineConfig::with_base("EUR").unwrap()).await;
        f.stale_rate("EUR", "USD", dec!(0.9)).await;

        assert!(matches!(
            f.engine.convert("1", "EUR", "USD").await,
            Err(FxError::StaleRate(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_leg_fails_triangulation() {
        let f = setup_with(EngineConfig::with_base("EUR").unwrap()).await;
        f.rate("EUR", "USD", dec!(0.9)).await;
        f.stale_rate("EUR", "GBP", dec!(0.8)).await;

        assert!(matches!(
            f.engine.convert("90", "USD", "GBP").await,
            Err(FxError::StaleRate(_))
        ));
    }

    #[tokio::test]
    async fn test_live_cache_entry_past_window_is_not_served() {
        let f = setup_with(EngineConfig::with_base("EUR").unwrap()).await;
        f.stale_rate("EUR", "USD", dec!(0.9)).await;
        let old = now() - Duration::hours(2);
        f.cache
            .set(
                "rate_EUR_USD",
                json!({
                    "rate": "0.9",
                    "timestamp": old.to_rfc3339(),
                    "update_timestamp": old.to_rfc3339(),
                })
                .to_string(),
                Duration::hours(24),
            )
            .await
            .unwrap();

        assert!(matches!(
            f.engine.convert("1", "EUR", "USD").await,
            Err(FxError::StaleRate(_))
        ));
        assert!(f.cache.get("rate_EUR_USD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_through_replaces_cached_rate() {
        let f = setup().await;
        assert_eq!(
            f.engine.convert("100", "EUR", "USD").await.unwrap().converted_amount,
            dec!(90)
        );

        f.rate("EUR", "USD", dec!(0.95)).await;

        assert_eq!(
            f.engine.convert("100", "EUR", "USD").await.unwrap().converted_amount,
            dec!(95)
        );
    }

    #[tokio::test]
    async fn test_zero_rates_fail() {
        let f = setup().await;
        f.rate("GBP", "JPY", Decimal::ZERO).await;

        assert!(matches!(
            f.engine.convert("10", "JPY", "GBP").await,
            Err(FxError::ZeroRate(_))
        ));
        assert!(matches!(
            f.engine.convert("10", "GBP", "JPY").await,
            Err(FxError::ZeroRate(_))
        ));
    }

    #[tokio::test]
    async fn test_input_errors() {
        let f = setup().await;

        assert!(matches!(
            f.engine.convert("abc", "EUR", "USD").await,
            Err(FxError::InvalidInput(_))
        ));
        assert!(matches!(
            f.engine.convert("1", "", "USD").await,
            Err(FxError::InvalidInput(_))
        ));
        assert!(matches!(
            f.engine.convert("1", "EUR", "XXX").await,
            Err(FxError::CurrencyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_rates() {
        let f = setup().await;
        assert!(matches!(
            f.engine.convert("1", "USD", "CHF").await,
            Err(FxError::RateNotAvailable(_))
        ));

        let unconfigured = setup_with(EngineConfig::default()).await;
        assert!(matches!(
            unconfigured.engine.convert("1", "USD", "GBP").await,
            Err(FxError::BaseCurrencyNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_disabled_base_is_not_configured() {
        let f = setup().await;
        f.store
            .upsert_currency(&Currency::new(code("EUR"), "EUR", 4).disabled())
            .await
            .unwrap();

        assert!(matches!(
            f.engine.convert("90", "USD", "GBP").await,
            Err(FxError::BaseCurrencyNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_triangulation_matches_composed_hops() {
        let f = setup().await;

        let through = f.engine.convert("123.45", "USD", "GBP").await.unwrap();
        let to_base = f.engine.convert("123.45", "USD", "EUR").await.unwrap();
        let hop = f
            .engine
            .convert(&to_base.converted_amount.to_string(), "EUR", "GBP")
            .await
            .unwrap();

        assert!((through.converted_amount - hop.converted_amount).abs() <= dec!(0.0001));
    }

    proptest! {
        #[test]
        fn identity_conversion_is_quantization(units in -1_000_000_000_000i64..1_000_000_000_000i64, scale in 0u32..10) {
            let amount = Decimal::new(units, scale);
            let conversion = tokio_test::block_on(async {
                let f = setup().await;
                f.engine.convert_amount(amount, &code("USD"), &code("USD")).await
            }).unwrap();

            prop_assert_eq!(conversion.converted_amount, quantize(amount, 4));
            prop_assert_eq!(conversion.rate, Decimal::ONE);
        }

        #[test]
        fn round_trip_stays_within_one_unit(units in 10_000i64..100_000i64) {
            let rate = Decimal::new(units, 4);
            let back = tokio_test::block_on(async {
                let f = setup_with(EngineConfig::default()).await;
                f.rate("USD", "GBP", rate).await;
                let there = f.engine.convert("100", "USD", "GBP").await.unwrap();
                f.engine
                    .convert_amount(there.converted_amount, &code("GBP"), &code("USD"))
                    .await
                    .unwrap()
            });

            prop_assert!((back.converted_amount - dec!(100)).abs() <= dec!(0.0001));
        }
    }
}
