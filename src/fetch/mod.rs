//! Subgraph fetching.
//!
//! # Data Flow
//! ```text
//! Plan (from the operation engine)
//!     → orchestrator.rs: waves of independent steps
//!     → RetryExecutor + CircuitBreaker per step
//!     → transport.rs: one HTTP round trip per attempt
//!     → merge stage
//! ```

pub mod orchestrator;
pub mod plan;
pub mod transport;
pub mod types;

pub use orchestrator::{FetchContext, FetchOrchestrator};
pub use plan::{FetchStep, Plan};
pub use transport::{HttpTransport, SubgraphTransport};
pub use types::{FetchError, OperationKind, SubgraphRequest, SubgraphResponse, TransportError};
