//! FxQuote FX Engine
//!
//! Rate resolution, currency conversion and rate ingestion.
//!
//! # Features
//!
//! - Read-through, write-through rate cache in front of the store
//! - Direct, inverse and base-triangulated conversion with quantization
//! - Provider ingestion under an explicit retry policy
//!
//! # Example
//!
//! ```rust,ignore
//! use fxquote_fx::{ConversionEngine, EngineConfig, RateCache, RateCacheConfig};
//!
//! let rates = Arc::new(RateCache::new(cache, store.clone(), RateCacheConfig::default()));
//! let engine = ConversionEngine::new(store, rates, EngineConfig::with_base("EUR")?);
//!
//! let conversion = engine.convert("90", "USD", "GBP").await?;
//! ```

pub mod cache;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod provider;
pub mod retry;

pub use cache::{RateCache, RateCacheConfig};
pub use conversion::{Conversion, ConversionPath};
pub use engine::{ConversionEngine, EngineConfig};
pub use error::{FxError, FxResult, ProviderError};
pub use ingestion::{IngestionConfig, IngestionOutcome, RateIngestionJob, SkipReason};
pub use provider::{HttpRateProvider, ProviderPayload, ProviderRequest, RateProvider};
pub use retry::RetryPolicy;

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
