//! Replay guard for mutating operations.
//!
//! The first request carrying a token runs the operation and stores its
//! response; repeats within the TTL get the stored response back without
//! running anything. There is no in-flight marker, so two concurrent first
//! requests may both run. Store uniqueness constraints catch the duplicate.

use std::future::Future;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use fxquote_common::{FxQuoteError, FxQuoteResult, IdempotencyToken};
use fxquote_store::SharedCacheStore;

/// Status and body of a guarded operation, as replayed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotentResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl IdempotentResponse {
    /// Create a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 201 response.
    pub fn created(body: Value) -> Self {
        Self::new(201, body)
    }

    /// Error response shaped by the error's status and body.
    pub fn from_error(err: &FxQuoteError) -> Self {
        Self::new(err.http_status(), err.to_body())
    }

    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the status is 5xx.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Whether the operation ran for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Operation executed now.
    Fresh,
    /// Stored response returned.
    Replayed,
}

/// Token-keyed response cache.
pub struct IdempotencyCache {
    cache: SharedCacheStore,
    ttl: Duration,
}

impl IdempotencyCache {
    /// Create an idempotency cache whose entries live for `ttl`.
    pub fn new(cache: SharedCacheStore, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Run `operation` at most once per token within the TTL.
    ///
    /// A missing or blank token fails with `IdempotencyKeyMissing`. Server
    /// errors are returned but not stored.
    pub async fn execute<F, Fut>(
        &self,
        token: Option<&str>,
        operation: F,
    ) -> FxQuoteResult<(IdempotentResponse, Execution)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IdempotentResponse>,
    {
        let token = token
            .and_then(IdempotencyToken::new)
            .ok_or(FxQuoteError::IdempotencyKeyMissing)?;
        let key = token.cache_key();

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<IdempotentResponse>(&raw) {
                Ok(stored) => {
                    debug!(token = %token, status = stored.status, "Replaying stored response");
                    return Ok((stored, Execution::Replayed));
                }
                Err(e) => warn!(token = %token, error = %e, "Ignoring malformed stored response"),
            },
            Ok(None) => {}
            Err(e) => warn!(token = %token, error = %e, "Idempotency lookup failed"),
        }

        let response = operation().await;

        if response.is_server_error() {
            debug!(token = %token, status = response.status, "Not storing server error");
            return Ok((response, Execution::Fresh));
        }

        match serde_json::to_string(&response) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, self.ttl).await {
                    warn!(token = %token, error = %e, "Failed to store idempotent response");
                }
            }
            Err(e) => warn!(token = %token, error = %e, "Failed to encode idempotent response"),
        }

        Ok((response, Execution::Fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxquote_store::{CacheStore, MemoryCache};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryCache>, IdempotencyCache) {
        let cache = Arc::new(MemoryCache::connected());
        let guard = IdempotencyCache::new(cache.clone(), Duration::hours(24));
        (cache, guard)
    }

    #[tokio::test]
    async fn test_runs_once_and_replays() {
        let (_, guard) = setup();
        let calls = AtomicU32::new(0);

        let run = || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            IdempotentResponse::created(json!({"n": n}))
        };

        let (first, e1) = guard.execute(Some("abc"), run).await.unwrap();
        let (second, e2) = guard.execute(Some(" abc "), run).await.unwrap();

        assert_eq!(e1, Execution::Fresh);
        assert_eq!(e2, Execution::Replayed);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (_, guard) = setup();

        for token in [None, Some(""), Some("   ")] {
            let result = guard
                .execute(token, || async { IdempotentResponse::created(json!({})) })
                .await;
            assert_eq!(result.unwrap_err(), FxQuoteError::IdempotencyKeyMissing);
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_stored_server_errors_are_not() {
        let (cache, guard) = setup();

        let rejected = IdempotentResponse::from_error(&FxQuoteError::invalid_field(
            "quote",
            "Quote has expired.",
        ));
        guard
            .execute(Some("t1"), || async { rejected.clone() })
            .await
            .unwrap();
        assert!(cache.get("idempotent:t1").await.unwrap().is_some());

        let failed = IdempotentResponse::from_error(&FxQuoteError::Internal("db down".into()));
        guard
            .execute(Some("t2"), || async { failed.clone() })
            .await
            .unwrap();
        assert!(cache.get("idempotent:t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_outage_still_executes() {
        let (cache, guard) = setup();
        cache.close().await;

        let (response, execution) = guard
            .execute(Some("abc"), || async { IdempotentResponse::created(json!({"ok": true})) })
            .await
            .unwrap();

        assert_eq!(execution, Execution::Fresh);
        assert!(response.is_success());
    }
}
