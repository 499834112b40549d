//! Response merging and subgraph error propagation.
//!
//! # Data Flow
//! ```text
//! FetchResult (plan index, data, errors, status, headers)
//!     → merger.rs: data merged at the step path, failed fields nulled
//!     → propagation.rs: client errors (wrapped or pass-through)
//!     → headers.rs: response headers folded in plan order
//!     → GraphQLResponse { errors, data } + headers
//! ```

pub mod graphql;
pub mod headers;
pub mod merger;
pub mod propagation;

pub use graphql::{GraphQLError, GraphQLResponse};
pub use merger::{FetchResult, MergedResponse, Merger};
