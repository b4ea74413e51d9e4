//! Metrics collection for service monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Service metrics.
pub struct Metrics {
    /// Conversions completed.
    pub conversions_total: AtomicU64,
    /// Conversions that failed.
    pub conversions_failed: AtomicU64,
    /// Quotes persisted.
    pub quotes_created: AtomicU64,
    /// Transactions persisted.
    pub transactions_created: AtomicU64,
    /// Duplicate transactions rejected.
    pub transaction_conflicts: AtomicU64,
    /// Responses replayed from the idempotency cache.
    pub idempotent_replays: AtomicU64,
    /// Ingestion runs that refreshed rates.
    pub ingestion_runs: AtomicU64,
    /// Ingestion runs skipped.
    pub ingestion_skipped: AtomicU64,
    /// Ingestion runs that failed.
    pub ingestion_failed: AtomicU64,
    /// Rate rows written by ingestion.
    pub rates_upserted: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            conversions_total: AtomicU64::new(0),
            conversions_failed: AtomicU64::new(0),
            quotes_created: AtomicU64::new(0),
            transactions_created: AtomicU64::new(0),
            transaction_conflicts: AtomicU64::new(0),
            idempotent_replays: AtomicU64::new(0),
            ingestion_runs: AtomicU64::new(0),
            ingestion_skipped: AtomicU64::new(0),
            ingestion_failed: AtomicU64::new(0),
            rates_upserted: AtomicU64::new(0),
        }
    }

    /// Record a completed conversion.
    pub fn conversion_completed(&self) {
        self.conversions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed conversion.
    pub fn conversion_failed(&self) {
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a persisted quote.
    pub fn quote_created(&self) {
        self.quotes_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a persisted transaction.
    pub fn transaction_created(&self) {
        self.transactions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate transaction.
    pub fn transaction_conflict(&self) {
        self.transaction_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a replayed response.
    pub fn idempotent_replay(&self) {
        self.idempotent_replays.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refreshing ingestion run.
    pub fn ingestion_refreshed(&self, rows: usize) {
        self.ingestion_runs.fetch_add(1, Ordering::Relaxed);
        self.rates_upserted.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Record a skipped ingestion run.
    pub fn ingestion_skip(&self) {
        self.ingestion_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed ingestion run.
    pub fn ingestion_failure(&self) {
        self.ingestion_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            conversions_total: self.conversions_total.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            quotes_created: self.quotes_created.load(Ordering::Relaxed),
            transactions_created: self.transactions_created.load(Ordering::Relaxed),
            transaction_conflicts: self.transaction_conflicts.load(Ordering::Relaxed),
            idempotent_replays: self.idempotent_replays.load(Ordering::Relaxed),
            ingestion_runs: self.ingestion_runs.load(Ordering::Relaxed),
            ingestion_skipped: self.ingestion_skipped.load(Ordering::Relaxed),
            ingestion_failed: self.ingestion_failed.load(Ordering::Relaxed),
            rates_upserted: self.rates_upserted.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("conversions_total", "Conversions completed", snapshot.conversions_total),
            ("conversions_failed", "Conversions failed", snapshot.conversions_failed),
            ("quotes_created", "Quotes persisted", snapshot.quotes_created),
            ("transactions_created", "Transactions persisted", snapshot.transactions_created),
            ("transaction_conflicts", "Duplicate transactions rejected", snapshot.transaction_conflicts),
            ("idempotent_replays", "Responses replayed for a known token", snapshot.idempotent_replays),
            ("ingestion_runs", "Ingestion runs that refreshed rates", snapshot.ingestion_runs),
            ("ingestion_skipped", "Ingestion runs skipped", snapshot.ingestion_skipped),
            ("ingestion_failed", "Ingestion runs failed", snapshot.ingestion_failed),
            ("rates_upserted", "Rate rows written by ingestion", snapshot.rates_upserted),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP fxquote_{name} {help}\n# TYPE fxquote_{name} counter\nfxquote_{name} {value}\n\n"
            ));
        }
        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub conversions_total: u64,
    pub conversions_failed: u64,
    pub quotes_created: u64,
    pub transactions_created: u64,
    pub transaction_conflicts: u64,
    pub idempotent_replays: u64,
    pub ingestion_runs: u64,
    pub ingestion_skipped: u64,
    pub ingestion_failed: u64,
    pub rates_upserted: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
