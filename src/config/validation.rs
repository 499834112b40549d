//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, bucket counts, worker counts)
//! - Detect contradictory settings (warmup enabled without a source)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Expression and algorithm checks live in `traffic.rs`, where rules are compiled

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, CostMode, GatewayConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breaker(
        "traffic_shaping.all.circuit_breaker",
        &config.traffic_shaping.all.circuit_breaker,
        &mut errors,
    );
    for (name, rule) in &config.traffic_shaping.subgraphs {
        validate_breaker(
            &format!("traffic_shaping.subgraphs.{name}.circuit_breaker"),
            &rule.circuit_breaker,
            &mut errors,
        );
    }

    let tiers = [
        ("cache.parse", &config.cache.parse),
        ("cache.normalization", &config.cache.normalization),
        ("cache.validation", &config.cache.validation),
        ("cache.plan", &config.cache.plan),
        ("cache.persisted_operation", &config.cache.persisted_operation),
    ];
    for (field, tier) in tiers {
        if tier.size == 0 {
            errors.push(ValidationError::new(format!("{field}.size"), "must be greater than 0"));
        }
        if tier.ttl.is_zero() {
            errors.push(ValidationError::new(format!("{field}.ttl"), "must be greater than 0"));
        }
    }
    if config.cache.shards == 0 {
        errors.push(ValidationError::new("cache.shards", "must be greater than 0"));
    }

    let warmup = &config.cache_warmup;
    if warmup.enabled {
        if warmup.workers == 0 {
            errors.push(ValidationError::new("cache_warmup.workers", "must be greater than 0"));
        }
        if warmup.items_per_second == 0 {
            errors.push(ValidationError::new(
                "cache_warmup.items_per_second",
                "must be greater than 0",
            ));
        }
        if warmup.source.filesystem.is_none() && warmup.source.cdn.is_none() {
            errors.push(ValidationError::new(
                "cache_warmup.source",
                "a filesystem or cdn source is required when warmup is enabled",
            ));
        }
    }

    let cost = &config.cost_control;
    if cost.enabled && cost.mode == CostMode::Enforce && cost.max_estimated_limit == 0 {
        errors.push(ValidationError::new(
            "cost_control.max_estimated_limit",
            "must be greater than 0 in enforce mode",
        ));
    }

    for (i, rule) in config.header_propagation.rules.iter().enumerate() {
        if rule.name.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("header_propagation.rules[{i}].name"),
                "must not be empty",
            ));
        }
    }

    let mut seen = HashSet::new();
    for flag in &config.feature_flags {
        if flag.is_empty() {
            errors.push(ValidationError::new("feature_flags", "flag names must not be empty"));
        } else if !seen.insert(flag.as_str()) {
            errors.push(ValidationError::new(
                "feature_flags",
                format!("duplicate feature flag '{flag}'"),
            ));
        }
    }

    if config.max_plan_depth == 0 {
        errors.push(ValidationError::new("max_plan_depth", "must be greater than 0"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if !breaker.enabled {
        return;
    }
    if breaker.num_buckets == 0 {
        errors.push(ValidationError::new(format!("{field}.num_buckets"), "must be greater than 0"));
    } else if breaker.rolling_duration.as_millis() < breaker.num_buckets as u128 {
        errors.push(ValidationError::new(
            format!("{field}.rolling_duration"),
            "must allow at least one millisecond per bucket",
        ));
    }
    if breaker.error_threshold_percentage > 100 {
        errors.push(ValidationError::new(
            format!("{field}.error_threshold_percentage"),
            "must be between 0 and 100",
        ));
    }
    if breaker.half_open_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{field}.half_open_attempts"),
            "must be greater than 0",
        ));
    }
}
