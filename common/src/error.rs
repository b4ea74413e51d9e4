//! Caller-facing error taxonomy for FxQuote.

use serde_json::{json, Value};
use thiserror::Error;

/// Main error type surfaced to callers of FxQuote operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FxQuoteError {
    /// Malformed amount, empty code or a failed business validation.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Unknown currency, unconfigured base, no rate on any path, unknown quote.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resolvable rate is older than the freshness window.
    #[error("Stale rate: {0}")]
    StaleRate(String),

    /// A zero rate was encountered on the resolution path.
    #[error("Zero rate: {0}")]
    ZeroRate(String),

    /// Duplicate transaction for a quote and amount.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mutating call without an idempotency token.
    #[error("Idempotency key missing")]
    IdempotencyKeyMissing,

    /// Rate provider failure after retries.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Store or cache failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FxQuoteError {
    /// Input error without a field.
    pub fn invalid(message: impl Into<String>) -> Self {
        FxQuoteError::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Input error attributed to a request field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        FxQuoteError::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FxQuoteError::ProviderError(_) | FxQuoteError::Internal(_)
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxQuoteError::InvalidInput { .. } => "INVALID_INPUT",
            FxQuoteError::NotFound(_) => "NOT_FOUND",
            FxQuoteError::StaleRate(_) => "STALE_RATE",
            FxQuoteError::ZeroRate(_) => "ZERO_RATE",
            FxQuoteError::Conflict(_) => "CONFLICT",
            FxQuoteError::IdempotencyKeyMissing => "IDEMPOTENCY_KEY_MISSING",
            FxQuoteError::ProviderError(_) => "PROVIDER_ERROR",
            FxQuoteError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            FxQuoteError::InvalidInput { .. } => 400,
            FxQuoteError::IdempotencyKeyMissing => 400,
            FxQuoteError::NotFound(_) => 404,
            FxQuoteError::Conflict(_) => 409,
            FxQuoteError::StaleRate(_) | FxQuoteError::ZeroRate(_) => 422,
            FxQuoteError::ProviderError(_) => 502,
            FxQuoteError::Internal(_) => 500,
        }
    }

    /// JSON body describing the error.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });
        if let FxQuoteError::InvalidInput {
            field: Some(field), ..
        } = self
        {
            body["field"] = Value::String(field.clone());
        }
        body
    }
}

/// Result type alias for FxQuote operations.
pub type FxQuoteResult<T> = std::result::Result<T, FxQuoteError>;
