//! Rate provider traits and implementations.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use fxquote_common::{CurrencyCode, Timestamp};

use crate::error::ProviderError;

/// Snapshot request sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Currency the rates are quoted against.
    pub base: CurrencyCode,
    /// Requested target currencies, sorted.
    pub symbols: Vec<CurrencyCode>,
    /// Optional credential.
    pub access_key: Option<String>,
}

impl ProviderRequest {
    /// Create a request; symbols are sorted and de-duplicated.
    pub fn new(
        base: CurrencyCode,
        mut symbols: Vec<CurrencyCode>,
        access_key: Option<String>,
    ) -> Self {
        symbols.sort();
        symbols.dedup();
        Self {
            base,
            symbols,
            access_key: access_key.filter(|k| !k.is_empty()),
        }
    }

    /// Query string parameters.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("base", self.base.to_string())];
        if !self.symbols.is_empty() {
            let symbols: Vec<&str> = self.symbols.iter().map(|c| c.as_str()).collect();
            pairs.push(("symbols", symbols.join(",")));
        }
        if let Some(key) = &self.access_key {
            pairs.push(("access_key", key.clone()));
        }
        pairs
    }
}

/// Parsed provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload {
    /// Currency code to raw rate value, as sent.
    pub rates: BTreeMap<String, Value>,
    /// Epoch seconds the snapshot was taken at.
    pub timestamp: Option<i64>,
    /// Calendar date of the snapshot (`%Y-%m-%d`).
    pub date: Option<String>,
}

impl ProviderPayload {
    /// Parse a provider JSON body.
    pub fn from_json(value: Value) -> Result<Self, ProviderError> {
        let Value::Object(mut body) = value else {
            return Err(ProviderError::Payload("body is not an object".into()));
        };

        if let Some(error) = body.get("error").filter(|e| is_truthy(e)) {
            let message = match error {
                Value::Object(details) => details
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(ProviderError::Api(message));
        }

        let timestamp = match body.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let seconds = epoch_seconds(raw);
                if seconds.is_none() {
                    warn!(timestamp = %raw, "Ignoring unusable provider timestamp");
                }
                seconds
            }
        };

        let date = body
            .get("date")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let rates = match body.remove("rates") {
            Some(Value::Object(rates)) => rates.into_iter().collect(),
            Some(_) => return Err(ProviderError::Payload("rates is not an object".into())),
            None => return Err(ProviderError::MissingField("rates")),
        };

        Ok(Self {
            rates,
            timestamp,
            date,
        })
    }

    /// When the snapshot was true at the source.
    ///
    /// Prefers the epoch timestamp, then the date at midnight UTC, then `now`.
    pub fn observed_at(&self, now: Timestamp) -> Timestamp {
        if let Some(ts) = self.timestamp {
            if let Some(observed) = Utc.timestamp_opt(ts, 0).single() {
                return observed;
            }
            warn!(timestamp = ts, "Provider timestamp out of range");
        }

        if let Some(date) = &self.date {
            match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                Ok(day) => {
                    if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
                        return midnight.and_utc();
                    }
                }
                Err(_) => warn!(date = %date, "Unable to parse provider date"),
            }
        }

        now
    }
}

/// Whole epoch seconds from an integer, a float (truncated) or a numeric string.
fn epoch_seconds(value: &Value) -> Option<i64> {
    let truncate = |f: f64| (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.trunc() as i64);

    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Trait for FX rate providers.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch one rate snapshot.
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderPayload, ProviderError>;
}

/// Provider reached over HTTP: `GET <url>?base=..&symbols=..[&access_key=..]`.
pub struct HttpRateProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpRateProvider {
    /// Create a provider with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderPayload, ProviderError> {
        debug!(url = %self.url, base = %request.base, "Requesting rates");

        let response = self
            .client
            .get(&self.url)
            .query(&request.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        ProviderPayload::from_json(body)
    }
}

/// Scripted rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<Value, ProviderError>>>,
    requests: parking_lot::Mutex<Vec<ProviderRequest>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider with no scripted responses.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Queue a JSON body for the next fetch.
    pub fn respond(&self, body: Value) -> &Self {
        self.responses.lock().push_back(Ok(body));
        self
    }

    /// Queue a failure for the next fetch.
    pub fn fail(&self, error: ProviderError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderPayload, ProviderError> {
        self.requests.lock().push(request.clone());
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(body)) => ProviderPayload::from_json(body),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Transport("no scripted response".into())),
        }
    }
}
