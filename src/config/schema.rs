//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the resilience layer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default retry predicate, used when a rule leaves `expression` empty.
pub const DEFAULT_RETRY_EXPRESSION: &str =
    "IsRetryableStatusCode() || IsConnectionError() || IsTimeout()";

/// Root configuration for one gateway configuration generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Retry, circuit breaker and timeout rules for subgraph traffic.
    pub traffic_shaping: TrafficShapingConfig,

    /// Size and TTL of the five operation cache tiers.
    pub cache: CacheConfig,

    /// Startup cache warmup.
    pub cache_warmup: CacheWarmupConfig,

    /// How subgraph errors reach the client.
    pub error_propagation: ErrorPropagationConfig,

    /// Subgraph response headers forwarded to the client.
    pub header_propagation: HeaderPropagationConfig,

    /// Estimated cost gate.
    pub cost_control: CostControlConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Feature flags served next to the base graph. Each one owns its own caches and breakers.
    pub feature_flags: Vec<String>,

    /// Upper bound on dependency depth of a fetch plan.
    pub max_plan_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            traffic_shaping: TrafficShapingConfig::default(),
            cache: CacheConfig::default(),
            cache_warmup: CacheWarmupConfig::default(),
            error_propagation: ErrorPropagationConfig::default(),
            header_propagation: HeaderPropagationConfig::default(),
            cost_control: CostControlConfig::default(),
            observability: ObservabilityConfig::default(),
            feature_flags: Vec::new(),
            max_plan_depth: 32,
        }
    }
}

/// Traffic rules: a default for all subgraphs plus per-subgraph overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TrafficShapingConfig {
    /// Rule applied to every subgraph without its own entry.
    pub all: SubgraphTrafficRule,

    /// Per-subgraph rules. An entry replaces `all` entirely for that subgraph.
    pub subgraphs: BTreeMap<String, SubgraphTrafficRule>,
}

/// Traffic rule for one subgraph (or the `all` default).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SubgraphTrafficRule {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeouts: TimeoutConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Backoff algorithm name (`backoff_jitter` or `constant`).
    pub algorithm: String,

    /// Maximum number of retries after the original attempt.
    pub max_attempts: u32,

    /// Budget for the cumulative sleep time of one logical call.
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,

    /// Base delay between attempts.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Predicate over `statusCode` and `error` deciding retryability.
    pub expression: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: "backoff_jitter".to_string(),
            max_attempts: 5,
            max_duration: Duration::from_secs(10),
            interval: Duration::from_secs(3),
            expression: DEFAULT_RETRY_EXPRESSION.to_string(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker.
    pub enabled: bool,

    /// Error rate (0-100) at which the breaker trips.
    pub error_threshold_percentage: u64,

    /// Minimum number of requests in the window before the error rate is considered.
    pub request_threshold: u64,

    /// Time spent open before probing.
    #[serde(with = "humantime_serde")]
    pub sleep_window: Duration,

    /// Trial budget while half-open.
    pub half_open_attempts: u32,

    /// Span of the rolling statistics window.
    #[serde(with = "humantime_serde")]
    pub rolling_duration: Duration,

    /// Number of buckets the rolling window is split into.
    pub num_buckets: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            error_threshold_percentage: 50,
            request_threshold: 20,
            sleep_window: Duration::from_secs(5),
            half_open_attempts: 1,
            rolling_duration: Duration::from_secs(10),
            num_buckets: 10,
        }
    }
}

/// Per-attempt timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for one attempt (request and response).
    #[serde(with = "humantime_serde")]
    pub request: Duration,

    /// Connection establishment timeout.
    #[serde(with = "humantime_serde")]
    pub dial: Duration,

    /// Time to wait for response headers. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub response_header: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            dial: Duration::from_secs(30),
            response_header: Duration::ZERO,
        }
    }
}

/// Operation cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub parse: CacheTierConfig,
    pub normalization: CacheTierConfig,
    pub validation: CacheTierConfig,
    pub plan: CacheTierConfig,
    pub persisted_operation: CacheTierConfig,

    /// Number of independently locked shards per tier.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            parse: CacheTierConfig::default(),
            normalization: CacheTierConfig::default(),
            validation: CacheTierConfig::default(),
            plan: CacheTierConfig::default(),
            persisted_operation: CacheTierConfig::default(),
            shards: 16,
        }
    }
}

/// Bounds of one cache tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheTierConfig {
    /// Maximum number of entries.
    pub size: usize,

    /// Sliding expiry, renewed on every hit.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Startup cache warmup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheWarmupConfig {
    pub enabled: bool,
    pub source: CacheWarmupSource,
    pub workers: usize,
    pub items_per_second: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CacheWarmupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: CacheWarmupSource::default(),
            workers: 8,
            items_per_second: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where the warmup corpus comes from.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheWarmupSource {
    pub filesystem: Option<FilesystemSourceConfig>,
    pub cdn: Option<CdnSourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemSourceConfig {
    /// Root directory, walked recursively.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdnSourceConfig {
    /// URL of the warmup manifest.
    pub url: String,

    /// Bearer token sent to the CDN.
    #[serde(default)]
    pub token: String,
}

/// Error propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PropagationMode {
    #[default]
    Wrapped,
    #[serde(alias = "passthrough")]
    PassThrough,
}

/// Subgraph error propagation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorPropagationConfig {
    /// Expose subgraph errors at all. When false, wrapped errors carry no nested detail.
    pub enabled: bool,
    pub mode: PropagationMode,
    pub propagate_status_codes: bool,
    pub rewrite_paths: bool,
    pub omit_locations: bool,
    pub omit_extensions: bool,
    pub attach_service_name: bool,
    pub default_extension_code: String,
    pub allow_all_extension_fields: bool,
    pub allowed_extension_fields: Vec<String>,
    pub allowed_fields: Vec<String>,
}

impl Default for ErrorPropagationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: PropagationMode::Wrapped,
            propagate_status_codes: false,
            rewrite_paths: true,
            omit_locations: true,
            omit_extensions: false,
            attach_service_name: true,
            default_extension_code: "DOWNSTREAM_SERVICE_ERROR".to_string(),
            allow_all_extension_fields: false,
            allowed_extension_fields: vec!["code".to_string()],
            allowed_fields: Vec::new(),
        }
    }
}

/// How a header seen on several subgraph responses is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderAlgorithm {
    FirstWrite,
    LastWrite,
    Append,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseHeaderRule {
    pub name: String,
    pub algorithm: HeaderAlgorithm,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeaderPropagationConfig {
    pub rules: Vec<ResponseHeaderRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    #[default]
    Measure,
    Enforce,
}

/// Estimated cost gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CostControlConfig {
    pub enabled: bool,
    pub mode: CostMode,
    pub max_estimated_limit: u64,
    pub expose_headers: bool,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
