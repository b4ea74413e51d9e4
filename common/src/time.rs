//! Time utilities and constants for FxQuote.

use chrono::{DateTime, Duration, Utc};

/// Default timing constants.
pub mod constants {
    use super::Duration;

    /// Maximum age of a rate before it is refused (1 hour).
    pub fn rate_freshness_window() -> Duration {
        Duration::hours(1)
    }

    /// Lifetime of a quote (10 minutes).
    pub fn quote_ttl() -> Duration {
        Duration::minutes(10)
    }

    /// How long an idempotent response is replayed (24 hours).
    pub fn idempotency_window() -> Duration {
        Duration::hours(24)
    }

    /// Timeout of a single provider request (10 seconds).
    pub fn provider_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// Interval between scheduled ingestion runs (1 hour).
    pub fn ingestion_interval() -> Duration {
        Duration::hours(1)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert a std duration, saturating at one century.
pub fn from_std(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(36_500))
}

/// Conversion back to std durations, clamping negatives to zero.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
