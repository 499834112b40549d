//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retries, caches, warmer:
//!     → events.rs (ResilienceObserver)
//!         → metrics.rs (counters, gauges, histograms)
//!     → tracing macros (structured log events)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every breaker, retry and cache event goes through one observer trait, so tests can record them
//! - Metric labels carry subgraph and feature flag, never operation text
//! - Attempt detail stays here; clients only see policy-filtered errors

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{MetricsObserver, NoopObserver, ResilienceObserver};
