//! Resilience events.
//!
//! Breakers, retries, caches and the warmer report what happened through a
//! `ResilienceObserver`. The default observer feeds the metrics facade;
//! tests plug in a recording one.

use crate::cache::CacheTier;
use crate::resilience::registry::BreakerKey;
use crate::resilience::retries::RetryAttempt;
use crate::observability::metrics;

/// Consumer of resilience events. Called on the hot path, so keep it cheap
/// and never call back into the component that emitted the event.
pub trait ResilienceObserver: Send + Sync {
    /// Exactly once per open/close transition.
    fn breaker_status_changed(&self, _key: &BreakerKey, _is_open: bool) {}

    /// Once per call denied by an open breaker.
    fn breaker_short_circuit(&self, _key: &BreakerKey) {}

    fn retry_attempt(&self, _subgraph: &str, _attempt: &RetryAttempt) {}

    /// `feature_flag` is `None` for the base graph.
    fn cache_lookup(&self, _tier: CacheTier, _feature_flag: Option<&str>, _hit: bool) {}

    fn warmup_item(&self, _processed: bool) {}
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

/// Default observer: events become metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl ResilienceObserver for MetricsObserver {
    fn breaker_status_changed(&self, key: &BreakerKey, is_open: bool) {
        metrics::record_breaker_transition(&key.subgraph_id, key.feature_flag.as_deref(), is_open);
    }

    fn breaker_short_circuit(&self, key: &BreakerKey) {
        metrics::record_short_circuit(&key.subgraph_id, key.feature_flag.as_deref());
    }

    fn retry_attempt(&self, subgraph: &str, _attempt: &RetryAttempt) {
        metrics::record_retry(subgraph);
    }

    fn cache_lookup(&self, tier: CacheTier, feature_flag: Option<&str>, hit: bool) {
        metrics::record_cache_lookup(tier.as_str(), feature_flag, hit);
    }

    fn warmup_item(&self, processed: bool) {
        metrics::record_warmup_item(if processed { "processed" } else { "failed" });
    }
}
