//! FxQuote Service
//!
//! The runtime that owns the store, the cache backend and the ingestion
//! schedule, and exposes quote and transaction operations guarded by
//! idempotency tokens.

pub mod config;
pub mod idempotency;
pub mod metrics;
pub mod quoting;
pub mod service;
pub mod state;

pub use config::{ProviderConfig, ServiceConfig};
pub use idempotency::{Execution, IdempotencyCache, IdempotentResponse};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use quoting::{CreateQuote, CreateTransaction, QuoteService};
pub use service::FxQuoteService;
pub use state::ServiceState;
