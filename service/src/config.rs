//! Service configuration.

use std::time::Duration;

use fxquote_common::{constants, CurrencyCode, DurationExt};

/// Rate provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Endpoint queried for rate snapshots.
    pub url: String,
    /// Credential sent as `access_key`.
    pub api_key: Option<String>,
    /// Timeout of a single request.
    pub timeout: Duration,
    /// Total fetch attempts per run.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound of a retry delay.
    pub retry_max_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: "https://api.exchangerate.host/latest".to_string(),
            api_key: None,
            timeout: constants::provider_timeout().as_std(),
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(600),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database URL.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub db_max_connections: u32,
    /// Pivot currency for triangulation and ingestion.
    pub base_currency: String,
    /// Maximum age of a usable rate.
    pub rate_freshness: Duration,
    /// Lifetime of a quote.
    pub quote_ttl: Duration,
    /// How long idempotent responses are replayed.
    pub idempotency_ttl: Duration,
    /// Interval between ingestion runs.
    pub ingest_interval: Duration,
    /// Provider configuration.
    pub provider: ProviderConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/fxquote".to_string(),
            db_max_connections: 10,
            base_currency: "EUR".to_string(),
            rate_freshness: constants::rate_freshness_window().as_std(),
            quote_ttl: constants::quote_ttl().as_std(),
            idempotency_ttl: constants::idempotency_window().as_std(),
            ingest_interval: constants::ingestion_interval().as_std(),
            provider: ProviderConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(max) = std::env::var("FXQUOTE_DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.db_max_connections = max;
            }
        }

        if let Ok(base) = std::env::var("FXQUOTE_BASE_CURRENCY") {
            config.base_currency = base;
        }

        if let Some(window) = env_secs("FXQUOTE_RATE_FRESHNESS_SECS") {
            config.rate_freshness = window;
        }

        if let Some(ttl) = env_secs("FXQUOTE_QUOTE_TTL_SECS") {
            config.quote_ttl = ttl;
        }

        if let Some(ttl) = env_secs("FXQUOTE_IDEMPOTENCY_TTL_SECS") {
            config.idempotency_ttl = ttl;
        }

        if let Some(interval) = env_secs("FXQUOTE_INGEST_INTERVAL_SECS") {
            config.ingest_interval = interval;
        }

        if let Ok(url) = std::env::var("FXQUOTE_PROVIDER_URL") {
            config.provider.url = url;
        }

        if let Ok(key) = std::env::var("FXQUOTE_PROVIDER_API_KEY") {
            if !key.is_empty() {
                config.provider.api_key = Some(key);
            }
        }

        if let Some(timeout) = env_secs("FXQUOTE_PROVIDER_TIMEOUT_SECS") {
            config.provider.timeout = timeout;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Parsed base currency code.
    pub fn base_currency_code(&self) -> Result<CurrencyCode, String> {
        CurrencyCode::parse(&self.base_currency).map_err(|e| format!("Base currency: {}", e))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.db_max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        self.base_currency_code()?;

        if self.rate_freshness.is_zero() {
            return Err("Rate freshness window cannot be 0".to_string());
        }

        if self.quote_ttl.is_zero() {
            return Err("Quote TTL cannot be 0".to_string());
        }

        if self.idempotency_ttl.is_zero() {
            return Err("Idempotency TTL cannot be 0".to_string());
        }

        if self.ingest_interval.is_zero() {
            return Err("Ingestion interval cannot be 0".to_string());
        }

        if self.provider.url.is_empty() {
            return Err("Provider URL cannot be empty".to_string());
        }

        if self.provider.timeout.is_zero() {
            return Err("Provider timeout cannot be 0".to_string());
        }

        if self.provider.max_attempts == 0 {
            return Err("Provider needs at least one attempt".to_string());
        }

        if self.provider.retry_base_delay > self.provider.retry_max_delay {
            return Err("Retry base delay cannot exceed max delay".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_currency_code().unwrap().as_str(), "EUR");
        assert_eq!(config.idempotency_ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.base_currency = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.quote_ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.provider.retry_base_delay = Duration::from_secs(1000);
        assert!(config.validate().is_err());
    }
}
