//! FxQuote Store
//!
//! Durable repository for currencies, rates, quotes and transactions, plus
//! the key/value cache capability injected into the rate and idempotency
//! caches.

pub mod cache;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use cache::{CacheStore, MemoryCache, SharedCacheStore};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{SharedStore, Store};
