//! Worker pool that runs a warmup corpus through the operation pipeline.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::schema::CacheWarmupConfig;
use crate::observability::events::ResilienceObserver;
use crate::pipeline::OperationProcessor;
use crate::warmup::source::{WarmupCorpus, WarmupError, WarmupItem, WarmupSource};
use crate::warmup::throttle::Throttle;

/// Pool size, pacing and deadline of one warmup run.
#[derive(Debug, Clone, Copy)]
pub struct WarmupSettings {
    pub workers: usize,
    pub items_per_second: u32,
    /// Zero disables the deadline.
    pub timeout: Duration,
}

impl From<&CacheWarmupConfig> for WarmupSettings {
    fn from(config: &CacheWarmupConfig) -> Self {
        Self {
            workers: config.workers,
            items_per_second: config.items_per_second,
            timeout: config.timeout,
        }
    }
}

/// Outcome of a warmup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub total: usize,
    /// Went through the whole pipeline.
    pub processed: usize,
    /// Rejected by one of the stages, or a corpus file that could not be read.
    pub failed: usize,
    /// Scoped to a feature flag this configuration does not know.
    pub skipped: usize,
    pub timed_out: bool,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

pub struct CacheWarmer {
    processor: Arc<OperationProcessor>,
    observer: Arc<dyn ResilienceObserver>,
}

impl CacheWarmer {
    pub fn new(processor: Arc<OperationProcessor>, observer: Arc<dyn ResilienceObserver>) -> Self {
        Self { processor, observer }
    }

    /// Load the corpus from `source` and warm the caches with it.
    ///
    /// Only enumerating the source can fail. Corpus files the source
    /// rejected and items rejected by the pipeline are counted as failed;
    /// items still queued when the deadline passes are abandoned.
    pub async fn warm(
        &self,
        source: &dyn WarmupSource,
        settings: WarmupSettings,
    ) -> Result<WarmupReport, WarmupError> {
        let WarmupCorpus { items, rejected } = source.load().await?;
        tracing::info!(
            source = %source.describe(),
            items = items.len(),
            rejected = rejected.len(),
            workers = settings.workers,
            items_per_second = settings.items_per_second,
            "Starting cache warmup"
        );
        let mut report = self.warm_items(items, settings).await;
        report.total += rejected.len();
        report.failed += rejected.len();
        Ok(report)
    }

    pub async fn warm_items(&self, items: Vec<WarmupItem>, settings: WarmupSettings) -> WarmupReport {
        let start = Instant::now();
        let mut report = WarmupReport {
            total: items.len(),
            ..WarmupReport::default()
        };

        let known: HashSet<&str> = self.processor.caches().feature_flags().collect();
        let mut queue = VecDeque::with_capacity(items.len());
        for item in items {
            match item.feature_flag.as_deref() {
                Some(flag) if !known.contains(flag) => {
                    tracing::debug!(feature_flag = flag, "Skipping warmup item for unknown feature flag");
                    report.skipped += 1;
                }
                _ => queue.push_back(item),
            }
        }

        let queue = Arc::new(Mutex::new(queue));
        let throttle = Arc::new(Throttle::new(settings.items_per_second, 1));
        let counters = Arc::new(Counters::default());

        let mut workers = JoinSet::new();
        for _ in 0..settings.workers.max(1) {
            let queue = queue.clone();
            let throttle = throttle.clone();
            let counters = counters.clone();
            let processor = self.processor.clone();
            let observer = self.observer.clone();
            workers.spawn(async move {
                loop {
                    let Some(item) = queue.lock().pop_front() else { break };
                    throttle.acquire().await;

                    let result = processor
                        .prepare(&item.request, &item.client, item.feature_flag.as_deref())
                        .await;
                    observer.warmup_item(result.is_ok());
                    match result {
                        Ok(_) => {
                            counters.processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::debug!(
                                feature_flag = item.feature_flag.as_deref().unwrap_or(""),
                                client = %item.client.name,
                                error = %e,
                                "Warmup item rejected"
                            );
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Warmup worker failed");
                }
            }
        };
        if settings.timeout.is_zero() {
            drain.await;
        } else if tokio::time::timeout(settings.timeout, drain).await.is_err() {
            report.timed_out = true;
        }
        workers.abort_all();

        report.processed = counters.processed.load(Ordering::Relaxed);
        report.failed = counters.failed.load(Ordering::Relaxed);
        let abandoned = queue.lock().len();
        if report.timed_out {
            tracing::warn!(
                abandoned,
                timeout = ?settings.timeout,
                "Cache warmup deadline reached, abandoning remaining items"
            );
        }
        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            elapsed = ?start.elapsed(),
            "Cache warmup finished"
        );
        report
    }
}
