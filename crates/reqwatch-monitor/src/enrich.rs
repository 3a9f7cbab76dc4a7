//! Asynchronous record enrichment after an exchange completes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::EnrichError;
use crate::exchange::ExchangeSnapshot;
use crate::monitor::Monitor;
use crate::record::Record;

/// Worker count of the enrichment pool.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Augments a completed record with derived data.
///
/// Enrichers run concurrently for unrelated exchanges and on arbitrary
/// worker threads.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, record: &mut Record, exchange: &ExchangeSnapshot) -> Result<(), EnrichError>;
}

/// Copies the tile cache verdict from the response headers.
pub struct CacheResultEnricher;

impl CacheResultEnricher {
    pub const CACHE_RESULT_HEADER: &'static str = "geowebcache-cache-result";
    pub const MISS_REASON_HEADER: &'static str = "geowebcache-miss-reason";
}

#[async_trait::async_trait]
impl Enricher for CacheResultEnricher {
    fn name(&self) -> &str {
        "cache-result"
    }

    async fn run(&self, record: &mut Record, exchange: &ExchangeSnapshot) -> Result<(), EnrichError> {
        if let Some(result) = exchange.response_header(Self::CACHE_RESULT_HEADER) {
            record.cache_result = Some(result.to_string());
        }
        if let Some(reason) = exchange.response_header(Self::MISS_REASON_HEADER) {
            record.miss_reason = Some(reason.to_string());
        }
        Ok(())
    }
}

/// Runs the enricher chain for completed records on a bounded pool, then
/// hands each record back to the monitor.
pub struct PostProcessor {
    monitor: Arc<Monitor>,
    enrichers: Arc<Vec<Arc<dyn Enricher>>>,
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl PostProcessor {
    pub fn new(monitor: Arc<Monitor>, runtime: Handle) -> Self {
        Self {
            monitor,
            enrichers: Arc::new(Vec::new()),
            permits: Arc::new(Semaphore::new(DEFAULT_POOL_SIZE)),
            runtime,
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(size.max(1)));
        self
    }

    /// Appends an enricher; enrichers run in the order added.
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        Arc::make_mut(&mut self.enrichers).push(enricher);
        self
    }

    pub fn enricher_names(&self) -> Vec<&str> {
        self.enrichers.iter().map(|e| e.name()).collect()
    }

    /// Schedules enrichment of `record`. The handle resolves to the enriched
    /// record after `post_processed` has been called.
    pub fn submit(&self, record: Record, exchange: ExchangeSnapshot) -> JoinHandle<Record> {
        let monitor = self.monitor.clone();
        let enrichers = self.enrichers.clone();
        let permits = self.permits.clone();

        self.runtime.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            process(&monitor, &enrichers, record, &exchange).await
        })
    }
}

async fn process(
    monitor: &Monitor,
    enrichers: &[Arc<dyn Enricher>],
    mut record: Record,
    exchange: &ExchangeSnapshot,
) -> Record {
    for enricher in enrichers {
        let outcome = AssertUnwindSafe(enricher.run(&mut record, exchange))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(id = record.id(), enricher = enricher.name(), "Enricher failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(id = record.id(), enricher = enricher.name(), "Enricher panicked");
            }
        }
    }
    monitor.post_processed(&record);
    record
}
