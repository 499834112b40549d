//! Resolved traffic-shaping table.
//!
//! # Data Flow
//! ```text
//! TrafficShapingConfig { all, subgraphs }
//!     → build(): compile expression + parse algorithm per rule
//!     → TrafficTable (immutable for one configuration generation)
//!     → rule_for(subgraph) at request time (single map lookup, no merging)
//! ```
//!
//! # Design Decisions
//! - A per-subgraph entry replaces `all` entirely, there is no field-level merge
//! - Unknown algorithms and invalid expressions are fatal, unless retries are disabled for the rule

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::schema::{
    CircuitBreakerConfig, RetryConfig, SubgraphTrafficRule, TimeoutConfig, TrafficShapingConfig,
};
use crate::resilience::backoff::BackoffAlgorithm;
use crate::resilience::expression::{ExpressionError, RetryExpression};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrafficConfigError {
    #[error("unknown retry algorithm '{algorithm}' for subgraph '{subgraph}'")]
    UnknownAlgorithm { subgraph: String, algorithm: String },

    #[error("invalid retry expression for subgraph '{subgraph}': {source}")]
    InvalidExpression {
        subgraph: String,
        #[source]
        source: ExpressionError,
    },
}

/// Retry policy with its algorithm and expression compiled.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub algorithm: BackoffAlgorithm,
    pub max_attempts: u32,
    pub max_duration: Duration,
    pub interval: Duration,
    pub expression: RetryExpression,
}

impl RetryPolicy {
    fn resolve(subgraph: &str, config: &RetryConfig) -> Result<Self, TrafficConfigError> {
        let algorithm = config.algorithm.parse::<BackoffAlgorithm>();
        let expression = RetryExpression::compile(&config.expression);

        let (algorithm, expression) = if config.enabled {
            let algorithm = algorithm.map_err(|algorithm| TrafficConfigError::UnknownAlgorithm {
                subgraph: subgraph.to_string(),
                algorithm,
            })?;
            let expression = expression.map_err(|source| TrafficConfigError::InvalidExpression {
                subgraph: subgraph.to_string(),
                source,
            })?;
            (algorithm, expression)
        } else {
            (
                algorithm.unwrap_or(BackoffAlgorithm::BackoffJitter),
                expression.unwrap_or_else(|_| RetryExpression::never()),
            )
        };

        Ok(Self {
            enabled: config.enabled,
            algorithm,
            max_attempts: config.max_attempts,
            max_duration: config.max_duration,
            interval: config.interval,
            expression,
        })
    }
}

/// Fully materialised rule for one subgraph.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeouts: TimeoutConfig,
}

impl ResolvedRule {
    fn resolve(subgraph: &str, rule: &SubgraphTrafficRule) -> Result<Self, TrafficConfigError> {
        Ok(Self {
            retry: RetryPolicy::resolve(subgraph, &rule.retry)?,
            circuit_breaker: rule.circuit_breaker.clone(),
            timeouts: rule.timeouts.clone(),
        })
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "retry": {
                "enabled": self.retry.enabled,
                "algorithm": self.retry.algorithm.as_str(),
                "max_attempts": self.retry.max_attempts,
                "max_duration_ms": self.retry.max_duration.as_millis() as u64,
                "interval_ms": self.retry.interval.as_millis() as u64,
                "expression": self.retry.expression.source(),
            },
            "circuit_breaker": {
                "enabled": self.circuit_breaker.enabled,
                "error_threshold_percentage": self.circuit_breaker.error_threshold_percentage,
                "request_threshold": self.circuit_breaker.request_threshold,
                "sleep_window_ms": self.circuit_breaker.sleep_window.as_millis() as u64,
                "half_open_attempts": self.circuit_breaker.half_open_attempts,
                "rolling_duration_ms": self.circuit_breaker.rolling_duration.as_millis() as u64,
                "num_buckets": self.circuit_breaker.num_buckets,
            },
            "timeouts": {
                "request_ms": self.timeouts.request.as_millis() as u64,
                "dial_ms": self.timeouts.dial.as_millis() as u64,
                "response_header_ms": self.timeouts.response_header.as_millis() as u64,
            },
        })
    }
}

/// Per-subgraph traffic rules for one configuration generation.
#[derive(Debug, Clone)]
pub struct TrafficTable {
    all: Arc<ResolvedRule>,
    subgraphs: HashMap<String, Arc<ResolvedRule>>,
}

impl TrafficTable {
    pub fn build(config: &TrafficShapingConfig) -> Result<Self, TrafficConfigError> {
        let all = Arc::new(ResolvedRule::resolve("all", &config.all)?);
        let subgraphs = config
            .subgraphs
            .iter()
            .map(|(name, rule)| Ok((name.clone(), Arc::new(ResolvedRule::resolve(name, rule)?))))
            .collect::<Result<HashMap<_, _>, TrafficConfigError>>()?;

        Ok(Self { all, subgraphs })
    }

    /// Rule for a subgraph, the `all` rule when it has no entry.
    pub fn rule_for(&self, subgraph: &str) -> Arc<ResolvedRule> {
        self.subgraphs
            .get(subgraph)
            .cloned()
            .unwrap_or_else(|| self.all.clone())
    }

    /// JSON view of the resolved table.
    pub fn describe(&self) -> serde_json::Value {
        let mut subgraphs: Vec<_> = self.subgraphs.iter().collect();
        subgraphs.sort_by(|a, b| a.0.cmp(b.0));
        let subgraphs: serde_json::Map<String, serde_json::Value> = subgraphs
            .into_iter()
            .map(|(name, rule)| (name.clone(), rule.describe()))
            .collect();
        json!({ "all": self.all.describe(), "subgraphs": subgraphs })
    }
}
