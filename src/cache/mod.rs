//! Operation cache subsystem.
//!
//! # Data Flow
//! ```text
//! request (document, operation name, variables, client, feature flag)
//!     → registry: pick the five-tier set of the scope (base or feature flag)
//!     → keys.rs: digest per tier
//!     → tier.rs: get / put (sharded LRU, sliding TTL)
//! ```
//!
//! # Design Decisions
//! - Five logically independent tiers; a miss in one says nothing about another
//! - Feature flags get their own tiers, never shared with the base graph
//! - Caches live for one configuration generation and are rebuilt on reload

pub mod keys;
pub mod operation_cache;
pub mod tier;

use std::fmt;

pub use operation_cache::{CacheRegistry, OperationCache};
pub use tier::{CacheStorage, TierStats};

/// SHA-256 digest identifying a cache entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationKey(pub [u8; 32]);

impl OperationKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn shard_hint(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(prefix)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationKey({})", &self.to_hex()[..16])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheTier {
    Parse,
    Normalization,
    Validation,
    Plan,
    PersistedOperation,
}

impl CacheTier {
    pub const ALL: [CacheTier; 5] = [
        CacheTier::Parse,
        CacheTier::Normalization,
        CacheTier::Validation,
        CacheTier::Plan,
        CacheTier::PersistedOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Parse => "parse",
            CacheTier::Normalization => "normalization",
            CacheTier::Validation => "validation",
            CacheTier::Plan => "plan",
            CacheTier::PersistedOperation => "persisted_operation",
        }
    }
}
