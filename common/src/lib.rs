//! FxQuote Common Types
//!
//! This crate contains shared types used across the FxQuote workspace,
//! including currency codes and records, exchange rates, quotes,
//! transactions, identifiers and the caller-facing error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod records;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use records::*;
pub use error::*;
pub use time::*;
