//! Read-through, write-through rate cache.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use fxquote_common::{
    now, parse_decimal, CurrencyCode, CurrencyPair, Rate, RateUpdate, Timestamp,
};
use fxquote_store::{SharedCacheStore, SharedStore};

use crate::error::{FxError, FxResult};

/// Configuration for rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Maximum age of a rate, measured from its last persisted update.
    /// Also the TTL of cache entries.
    pub freshness_window: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            freshness_window: fxquote_common::constants::rate_freshness_window(),
        }
    }
}

/// Rate cache in front of the store.
///
/// Reads consult the cache first and fall back to the store. Every rate
/// written through this type replaces the cache entry for its pair.
///
/// Cache writes are serialized by `write_lock`. A read-through fill only
/// lands if the cache does not already hold a row updated at or after the
/// one read from the store.
pub struct RateCache {
    cache: SharedCacheStore,
    store: SharedStore,
    config: RateCacheConfig,
    write_lock: Mutex<()>,
}

impl RateCache {
    /// Create a rate cache.
    pub fn new(cache: SharedCacheStore, store: SharedStore, config: RateCacheConfig) -> Self {
        Self {
            cache,
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the freshness window.
    pub fn freshness_window(&self) -> Duration {
        self.config.freshness_window
    }

    /// Resolve the current fresh rate for the ordered pair.
    ///
    /// Returns `Ok(None)` when no rate exists and `StaleRate` when the latest
    /// persisted rate is older than the freshness window.
    pub async fn get(&self, pair: &CurrencyPair) -> FxResult<Option<Rate>> {
        let key = pair.cache_key();
        let now = now();

        match self.cache.get(&key).await {
            Ok(Some(payload)) => match decode_payload(pair, &payload) {
                Some(rate) if rate.is_fresh_at(now, self.config.freshness_window) => {
                    debug!(pair = %pair, "Cache hit");
                    return Ok(Some(rate));
                }
                Some(_) => {
                    debug!(pair = %pair, "Cached rate is stale");
                    self.evict(&key).await;
                }
                None => {
                    warn!(pair = %pair, "Evicting malformed cache entry");
                    self.evict(&key).await;
                }
            },
            Ok(None) => debug!(pair = %pair, "Cache miss"),
            Err(e) => warn!(pair = %pair, error = %e, "Cache read failed"),
        }

        let Some(rate) = self.store.latest_rate(pair).await? else {
            return Ok(None);
        };

        if !rate.is_fresh_at(now, self.config.freshness_window) {
            return Err(FxError::StaleRate(pair.clone()));
        }

        self.fill(&rate).await;
        Ok(Some(rate))
    }

    /// Replace the cache entry for the rate's pair.
    ///
    /// Failures are logged and swallowed; the store stays authoritative.
    pub async fn put(&self, rate: &Rate) {
        let _guard = self.write_lock.lock().await;
        self.write(rate).await;
    }

    /// Cache a row read from the store unless a newer write already landed.
    async fn fill(&self, rate: &Rate) {
        let _guard = self.write_lock.lock().await;

        if let Ok(Some(payload)) = self.cache.get(&rate.pair.cache_key()).await {
            if let Some(cached) = decode_payload(&rate.pair, &payload) {
                if cached.updated_at >= rate.updated_at {
                    debug!(pair = %rate.pair, "Cache already holds a newer rate");
                    return;
                }
            }
        }

        self.write(rate).await;
    }

    async fn write(&self, rate: &Rate) {
        let key = rate.pair.cache_key();
        let payload = encode_payload(rate);

        if let Err(e) = self
            .cache
            .set(&key, payload, self.config.freshness_window)
            .await
        {
            warn!(pair = %rate.pair, error = %e, "Cache write failed");
        }
    }

    /// Append a historical rate row and write it through to the cache.
    pub async fn record_rate(&self, rate: &Rate) -> FxResult<Rate> {
        let stored = self.store.insert_rate(rate).await?;
        self.put(&stored).await;
        Ok(stored)
    }

    /// Upsert the current rate of every update in one store transaction and
    /// write each persisted row through to the cache after commit.
    pub async fn upsert_rates(
        &self,
        base: &CurrencyCode,
        updates: &[RateUpdate],
    ) -> FxResult<Vec<Rate>> {
        let written = self.store.upsert_rates(base, updates).await?;
        for rate in &written {
            self.put(rate).await;
        }
        Ok(written)
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }
}

/// Shared rate cache.
pub type SharedRateCache = Arc<RateCache>;

fn encode_payload(rate: &Rate) -> String {
    json!({
        "rate": rate.rate.to_string(),
        "timestamp": rate.observed_at.to_rfc3339(),
        "update_timestamp": rate.updated_at.to_rfc3339(),
    })
    .to_string()
}

fn decode_payload(pair: &CurrencyPair, payload: &str) -> Option<Rate> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let object = value.as_object()?;

    let rate = decode_decimal(object.get("rate")?)?;
    let observed_at = decode_timestamp(object.get("timestamp")?)?;
    let updated_at = match object.get("update_timestamp") {
        None | Some(Value::Null) => observed_at,
        Some(raw) => decode_timestamp(raw)?,
    };

    Some(Rate::new(pair.clone(), rate, observed_at, updated_at))
}

fn decode_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s).ok(),
        Value::Number(n) => parse_decimal(&n.to_string()).ok(),
        _ => None,
    }
}

fn decode_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        _ => None,
    }
}
