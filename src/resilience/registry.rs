//! Breaker registry keyed by (subgraph, feature flag).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::traffic::TrafficTable;
use crate::observability::events::ResilienceObserver;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Identity of one breaker. `feature_flag: None` is the base graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub subgraph_id: String,
    pub feature_flag: Option<String>,
}

impl BreakerKey {
    pub fn new(subgraph_id: impl Into<String>, feature_flag: Option<String>) -> Self {
        Self {
            subgraph_id: subgraph_id.into(),
            feature_flag,
        }
    }

    pub fn base(subgraph_id: impl Into<String>) -> Self {
        Self::new(subgraph_id, None)
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.feature_flag {
            Some(flag) => write!(f, "{}@{}", self.subgraph_id, flag),
            None => f.write_str(&self.subgraph_id),
        }
    }
}

/// Breakers for one configuration generation, created on first use.
pub struct BreakerRegistry {
    breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,
    traffic: Arc<TrafficTable>,
    observer: Arc<dyn ResilienceObserver>,
}

impl BreakerRegistry {
    pub fn new(traffic: Arc<TrafficTable>, observer: Arc<dyn ResilienceObserver>) -> Self {
        Self {
            breakers: DashMap::new(),
            traffic,
            observer,
        }
    }

    /// Breaker for `key`, or `None` when breaking is disabled for the subgraph.
    /// The subgraph rule is looked up by name; the key carries the subgraph id.
    pub fn get(&self, subgraph_name: &str, key: &BreakerKey) -> Option<Arc<CircuitBreaker>> {
        let rule = self.traffic.rule_for(subgraph_name);
        if !rule.circuit_breaker.enabled {
            return None;
        }
        if let Some(existing) = self.breakers.get(key) {
            return Some(existing.value().clone());
        }
        let breaker = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(breaker = %key, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    key.clone(),
                    rule.circuit_breaker.clone(),
                    self.observer.clone(),
                ))
            })
            .value()
            .clone();
        Some(breaker)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
