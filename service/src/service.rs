//! Service runtime wiring the store, caches, engine and ingestion schedule.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use fxquote_common::{from_std, FxQuoteError, FxQuoteResult};
use fxquote_fx::{
    ConversionEngine, EngineConfig, FxResult, IngestionConfig, IngestionOutcome, RateCache,
    RateCacheConfig, RateIngestionJob, RateProvider, RetryPolicy,
};
use fxquote_store::{SharedCacheStore, SharedStore};

use crate::config::ServiceConfig;
use crate::idempotency::IdempotencyCache;
use crate::metrics::{Metrics, SharedMetrics};
use crate::quoting::QuoteService;
use crate::state::ServiceState;

/// The FxQuote runtime.
pub struct FxQuoteService {
    config: ServiceConfig,
    state: Arc<RwLock<ServiceState>>,
    store: SharedStore,
    cache: SharedCacheStore,
    rates: Arc<RateCache>,
    engine: Arc<ConversionEngine>,
    quotes: Arc<QuoteService>,
    ingestion: Arc<RateIngestionJob>,
    metrics: SharedMetrics,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl FxQuoteService {
    /// Wire a service over the given store, cache backend and provider.
    pub fn new(
        config: ServiceConfig,
        store: SharedStore,
        cache: SharedCacheStore,
        provider: Arc<dyn RateProvider>,
    ) -> FxQuoteResult<Self> {
        config.validate().map_err(FxQuoteError::invalid)?;
        let base_currency = config.base_currency_code().map_err(FxQuoteError::invalid)?;

        let rates = Arc::new(RateCache::new(
            cache.clone(),
            store.clone(),
            RateCacheConfig {
                freshness_window: from_std(config.rate_freshness),
            },
        ));

        let engine = Arc::new(ConversionEngine::new(
            store.clone(),
            rates.clone(),
            EngineConfig {
                base_currency: Some(base_currency.clone()),
            },
        ));

        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let idempotency = Arc::new(IdempotencyCache::new(
            cache.clone(),
            from_std(config.idempotency_ttl),
        ));
        let quotes = Arc::new(QuoteService::new(
            store.clone(),
            engine.clone(),
            idempotency,
            metrics.clone(),
            from_std(config.quote_ttl),
        ));

        let retry = RetryPolicy::new(
            config.provider.max_attempts,
            config.provider.retry_base_delay,
            config.provider.retry_max_delay,
        );
        let ingestion = Arc::new(RateIngestionJob::new(
            store.clone(),
            rates.clone(),
            provider,
            retry,
            IngestionConfig {
                base_currency,
                access_key: config.provider.api_key.clone(),
            },
        ));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            store,
            cache,
            rates,
            engine,
            quotes,
            ingestion,
            metrics,
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            scheduler: Mutex::new(None),
        })
    }

    /// Connect the cache and start the ingestion schedule.
    #[instrument(skip(self))]
    pub async fn start(&self) -> FxQuoteResult<()> {
        info!(base_currency = %self.config.base_currency, "Starting FxQuote service");

        self.cache.connect().await?;

        let Some(mut shutdown_rx) = self.shutdown_rx.lock().take() else {
            return Err(FxQuoteError::Internal("Service already started".into()));
        };

        *self.state.write() = ServiceState::Running;

        let job = self.ingestion.clone();
        let metrics = self.metrics.clone();
        let period = self.config.ingest_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = ingest(&job, &metrics).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Ingestion schedule stopped");
                        break;
                    }
                }
            }
        });
        *self.scheduler.lock() = Some(handle);

        info!(
            ingest_interval_secs = period.as_secs(),
            "FxQuote service started successfully"
        );
        Ok(())
    }

    /// Stop the schedule and release the cache and store.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> FxQuoteResult<()> {
        info!("Stopping FxQuote service");

        *self.state.write() = ServiceState::ShuttingDown;

        let _ = self.shutdown_tx.try_send(());

        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ingestion schedule ended abnormally");
            }
        }

        self.cache.close().await;
        self.store.close().await;

        *self.state.write() = ServiceState::Stopped;

        let snapshot = self.metrics.snapshot();
        info!(
            conversions = snapshot.conversions_total,
            quotes = snapshot.quotes_created,
            transactions = snapshot.transactions_created,
            ingestion_runs = snapshot.ingestion_runs,
            "FxQuote service stopped"
        );
        Ok(())
    }

    /// Run one ingestion pass outside the schedule.
    pub async fn run_ingestion(&self) -> FxQuoteResult<IngestionOutcome> {
        ingest(&self.ingestion, &self.metrics)
            .await
            .map_err(FxQuoteError::from)
    }

    /// Get current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Quote and transaction operations.
    pub fn quotes(&self) -> &Arc<QuoteService> {
        &self.quotes
    }

    /// Conversion engine.
    pub fn engine(&self) -> &Arc<ConversionEngine> {
        &self.engine
    }

    /// Rate cache.
    pub fn rates(&self) -> &Arc<RateCache> {
        &self.rates
    }

    /// Service metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

async fn ingest(job: &RateIngestionJob, metrics: &Metrics) -> FxResult<IngestionOutcome> {
    let result = job.run().await;
    match &result {
        Ok(IngestionOutcome::Refreshed { updated, .. }) => metrics.ingestion_refreshed(*updated),
        Ok(IngestionOutcome::Skipped { .. }) => metrics.ingestion_skip(),
        Err(e) => {
            metrics.ingestion_failure();
            error!(error = %e, "Rate ingestion failed");
        }
    }
    result
}
