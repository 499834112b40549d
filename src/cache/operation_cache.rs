//! Five-tier operation cache and its per-scope registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::tier::{CacheStorage, TierStats};
use crate::cache::CacheTier;
use crate::config::schema::{CacheConfig, CacheTierConfig};
use crate::fetch::plan::Plan;
use crate::pipeline::types::{NormalizedOperation, ParsedOperation, ValidationResult};

fn storage<V: Clone>(tier: CacheTier, config: &CacheTierConfig, shards: usize) -> CacheStorage<V> {
    CacheStorage::new(tier, config.size, config.ttl, shards)
}

/// The five tiers of one scope (base graph or one feature flag).
pub struct OperationCache {
    pub parse: CacheStorage<Arc<ParsedOperation>>,
    pub normalization: CacheStorage<Arc<NormalizedOperation>>,
    pub validation: CacheStorage<Arc<ValidationResult>>,
    pub plan: CacheStorage<Arc<Plan>>,
    pub persisted: CacheStorage<Arc<NormalizedOperation>>,
}

impl OperationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let shards = config.shards;
        Self {
            parse: storage(CacheTier::Parse, &config.parse, shards),
            normalization: storage(CacheTier::Normalization, &config.normalization, shards),
            validation: storage(CacheTier::Validation, &config.validation, shards),
            plan: storage(CacheTier::Plan, &config.plan, shards),
            persisted: storage(CacheTier::PersistedOperation, &config.persisted_operation, shards),
        }
    }

    pub fn stats(&self) -> BTreeMap<CacheTier, TierStats> {
        BTreeMap::from([
            (CacheTier::Parse, self.parse.stats()),
            (CacheTier::Normalization, self.normalization.stats()),
            (CacheTier::Validation, self.validation.stats()),
            (CacheTier::Plan, self.plan.stats()),
            (CacheTier::PersistedOperation, self.persisted.stats()),
        ])
    }
}

/// Operation caches of one configuration generation, one set per scope.
pub struct CacheRegistry {
    base: Arc<OperationCache>,
    feature_flags: HashMap<String, Arc<OperationCache>>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig, feature_flags: &[String]) -> Self {
        Self {
            base: Arc::new(OperationCache::new(config)),
            feature_flags: feature_flags
                .iter()
                .map(|flag| (flag.clone(), Arc::new(OperationCache::new(config))))
                .collect(),
        }
    }

    pub fn base(&self) -> Arc<OperationCache> {
        self.base.clone()
    }

    /// Caches for a scope. `None` when the feature flag is not configured.
    pub fn scope(&self, feature_flag: Option<&str>) -> Option<Arc<OperationCache>> {
        match feature_flag {
            None => Some(self.base.clone()),
            Some(flag) => self.feature_flags.get(flag).cloned(),
        }
    }

    pub fn feature_flags(&self) -> impl Iterator<Item = &str> {
        self.feature_flags.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys;
    use crate::fetch::types::OperationKind;

    fn parsed(document: &str) -> Arc<ParsedOperation> {
        Arc::new(ParsedOperation {
            document: document.into(),
            operation_name: None,
            kind: OperationKind::Query,
            skip_include_variables: Vec::new(),
        })
    }

    #[test]
    fn test_scopes_are_isolated() {
        let registry = CacheRegistry::new(&CacheConfig::default(), &["myff".to_string()]);
        let base = registry.scope(None).unwrap();
        let flagged = registry.scope(Some("myff")).unwrap();
        assert!(registry.scope(Some("unknown")).is_none());

        let key = keys::parse_key("{ employees { id } }", None);
        base.parse.put(key, parsed("{ employees { id } }"));

        assert!(base.parse.get(&key).is_some());
        assert!(flagged.parse.get(&key).is_none());
        assert_eq!(flagged.parse.stats().misses, 1);
    }

    #[test]
    fn test_tiers_are_independent() {
        let cache = OperationCache::new(&CacheConfig::default());
        let key = keys::parse_key("{ a }", None);
        cache.parse.put(key, parsed("{ a }"));
        assert!(cache.normalization.get(&key).is_none());

        let stats = cache.stats();
        assert_eq!(stats[&CacheTier::Parse].entries, 1);
        assert_eq!(stats[&CacheTier::Normalization].misses, 1);
    }
}
