//! Operation cache warmup.
//!
//! # Responsibilities
//! - Enumerate a corpus of recorded operations from disk or a CDN manifest
//! - Run each item through the live pipeline so the caches it touches are populated
//! - Pace the run and bound it by a deadline
//!
//! # Data Flow
//! ```text
//! source.rs (filesystem | CDN) → WarmupCorpus (items + rejected files)
//!     → warmer.rs: shared queue → N workers
//!         → throttle.rs: token bucket
//!         → OperationProcessor::prepare (parse, normalize, validate, plan)
//!     → WarmupReport
//! ```
//!
//! # Design Decisions
//! - Items for unknown feature flags are skipped, not warmed into the base graph
//! - A rejected item is a cache miss like any other, never a warmup failure
//! - A malformed manifest costs only its own items; the rest of the corpus is still warmed

pub mod source;
pub mod throttle;
pub mod warmer;

pub use source::{
    from_config, CdnSource, FilesystemSource, WarmupCorpus, WarmupError, WarmupItem, WarmupItemKind,
    WarmupSource,
};
pub use throttle::Throttle;
pub use warmer::{CacheWarmer, WarmupReport, WarmupSettings};
