//! Subgraph resilience and operation cache layer for a GraphQL federation gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   GraphQLRequest
//!        │
//!        ▼
//!  ┌───────────┐   ┌──────────────────────────────────────────┐
//!  │  gateway  │──▶│ pipeline: parse → normalize → validate → │◀── cache (5 tiers, per scope)
//!  └─────┬─────┘   │           plan → cost gate               │◀── warmup (worker pool)
//!        │         └──────────────────────────────────────────┘
//!        ▼
//!  ┌───────────┐   ┌─────────────────────────────┐
//!  │   fetch   │──▶│ resilience: breaker + retry │──▶ subgraph (HTTP)
//!  └─────┬─────┘   └─────────────────────────────┘
//!        ▼
//!  ┌───────────┐
//!  │   merge   │──▶ { errors, data } + propagated headers
//!  └───────────┘
//!
//!  cross-cutting: config (TOML, hot reload), observability, lifecycle
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod gateway;
pub mod lifecycle;
pub mod merge;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod warmup;

pub use config::schema::GatewayConfig;
pub use gateway::{Gateway, GatewayParts, GatewayResponse, RequestContext};
pub use lifecycle::Shutdown;
