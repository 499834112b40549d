//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Subgraph call:
//!     → registry.rs (breaker for (subgraph, feature flag))
//!     → retries.rs (per attempt: breaker allow → timeouts.rs → transport → breaker report)
//!     → classify.rs (RetryContext: failure? retryable?)
//!     → expression.rs (compiled retry predicate)
//!     → backoff.rs (delay before next attempt, or Retry-After)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Retries only for queries and subscriptions, never mutations
//! - One classification judgment shared by retry, breaker and error propagation
//! - Breaker state is confined to its own (subgraph, feature flag) key

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod expression;
pub mod registry;
pub mod retries;
pub mod rolling_window;
pub mod timeouts;

pub use circuit_breaker::{AllowToken, BreakerState, CircuitBreaker};
pub use registry::{BreakerKey, BreakerRegistry};
pub use retries::{RetryAttempt, RetryExecutor};
