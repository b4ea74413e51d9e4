//! FX engine error types.

use fxquote_common::{CurrencyCode, CurrencyPair, FxQuoteError};
use fxquote_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the FX engine.
#[derive(Debug, Error)]
pub enum FxError {
    /// Malformed amount or currency code.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No currency record for the code.
    #[error("Currency not found: {0}")]
    CurrencyNotFound(CurrencyCode),

    /// Triangulation needed but the base currency is unset, unknown or disabled.
    #[error("Base currency not configured")]
    BaseCurrencyNotConfigured,

    /// Rate not available for the requested currency pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// Rate is older than the freshness window.
    #[error("Rate is stale for {0}")]
    StaleRate(CurrencyPair),

    /// A zero rate cannot be inverted or used.
    #[error("Zero rate for {0}")]
    ZeroRate(CurrencyPair),

    /// Arithmetic overflowed the decimal range.
    #[error("Conversion overflow for {0}")]
    Overflow(CurrencyPair),

    /// Rate provider failed.
    #[error("Rate provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Store or cache failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures talking to the external rate provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure or timeout.
    #[error("transport: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Body is not the expected JSON shape.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Required field absent from the payload.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// Provider reported an error in the payload.
    #[error("provider reported: {0}")]
    Api(String),

    /// Request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Check if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Payload(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Status(status.as_u16())
        } else if err.is_builder() {
            ProviderError::InvalidRequest(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<FxError> for FxQuoteError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::InvalidInput(message) => FxQuoteError::invalid(message),
            FxError::CurrencyNotFound(_)
            | FxError::BaseCurrencyNotConfigured
            | FxError::RateNotAvailable(_) => FxQuoteError::NotFound(err.to_string()),
            FxError::StaleRate(_) => FxQuoteError::StaleRate(err.to_string()),
            FxError::ZeroRate(_) => FxQuoteError::ZeroRate(err.to_string()),
            FxError::Overflow(_) => FxQuoteError::invalid(err.to_string()),
            FxError::Provider(e) => FxQuoteError::ProviderError(e.to_string()),
            FxError::Store(e) => e.into(),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
