//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → traffic.rs (compile retry rules into a per-subgraph table)
//!     → GatewayConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → gateway swaps a whole new generation (table, breakers, caches)
//! ```
//!
//! # Design Decisions
//! - A loaded config is never mutated; a change builds a new gateway generation
//! - Every field has a default, so an empty file is a valid config
//! - Semantic checks report every problem at once instead of the first

pub mod loader;
pub mod schema;
pub mod traffic;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::GatewayConfig;
pub use traffic::TrafficTable;
