//! Operation pipeline: from a client request to an executable plan.
//!
//! # Data Flow
//! ```text
//! GraphQLRequest + ClientInfo + feature flag
//!     → processor.rs (cache tiers of the scope, engine on miss)
//!     → cost.rs (estimated cost gate)
//!     → PreparedOperation { normalized operation, plan, cache hits }
//! ```
//!
//! # Design Decisions
//! - GraphQL itself (grammar, validation rules, planning) stays behind `OperationEngine`
//! - Client-facing failures are `RequestError`s carrying their HTTP status

pub mod cost;
pub mod engine;
pub mod processor;
pub mod types;

pub use engine::{InMemoryPersistedStore, OperationEngine, PersistedOperationStore};
pub use processor::OperationProcessor;
pub use types::{ClientInfo, GraphQLRequest, PreparedOperation, RequestError};
