//! Operation preparation through the five cache tiers.
//!
//! # Data Flow
//! ```text
//! persisted request ──▶ persisted tier ──miss──▶ store → parse tier → engine.normalize
//!                             │hit                                          │
//! query request ──▶ parse tier → normalization tier ───────────────────────┤
//!                                                                           ▼
//!                                     validation tier → plan tier → cost gate
//! ```
//!
//! # Design Decisions
//! - A miss delegates to the engine and stores the result; validation results are cached valid or not
//! - A persisted-store miss ends the request before validation and planning
//! - Requests for an unknown feature flag are served from the base graph caches

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::cache::keys;
use crate::cache::{CacheRegistry, CacheStorage, OperationCache, OperationKey};
use crate::observability::events::ResilienceObserver;
use crate::pipeline::cost::CostGate;
use crate::pipeline::engine::{OperationEngine, PersistedOperationStore};
use crate::pipeline::types::{
    CacheHits, ClientInfo, GraphQLRequest, NormalizedOperation, ParsedOperation, PersistedQuery,
    PreparedOperation, RequestError,
};

pub const NORMALIZATION_CACHE_HEADER: &str = "x-normalization-cache";
pub const PERSISTED_OPERATION_CACHE_HEADER: &str = "x-persisted-operation-cache";
pub const PLAN_CACHE_HEADER: &str = "x-execution-plan-cache";

pub struct OperationProcessor {
    engine: Arc<dyn OperationEngine>,
    persisted_store: Arc<dyn PersistedOperationStore>,
    caches: Arc<CacheRegistry>,
    cost: CostGate,
    observer: Arc<dyn ResilienceObserver>,
}

impl OperationProcessor {
    pub fn new(
        engine: Arc<dyn OperationEngine>,
        persisted_store: Arc<dyn PersistedOperationStore>,
        caches: Arc<CacheRegistry>,
        cost: CostGate,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Self {
        Self {
            engine,
            persisted_store,
            caches,
            cost,
            observer,
        }
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn cost(&self) -> &CostGate {
        &self.cost
    }

    /// Parse, normalize, validate and plan `request`, consulting the caches
    /// of the feature flag's scope first.
    pub async fn prepare(
        &self,
        request: &GraphQLRequest,
        client: &ClientInfo,
        feature_flag: Option<&str>,
    ) -> Result<PreparedOperation, RequestError> {
        let (cache, flag) = self.scope(feature_flag);
        let mut hits = CacheHits::default();
        let operation_name = request.operation_name.as_deref();

        let operation = match (&request.query, &request.extensions.persisted_query) {
            (None, Some(persisted)) => {
                let (operation, hit) = self
                    .persisted_operation(&cache, flag, persisted, request, client)
                    .await?;
                hits.persisted_operation = Some(hit);
                operation
            }
            (Some(document), _) => {
                let parsed = self.parse(&cache, flag, document, operation_name)?;
                let skip_include = keys::select_variables(&request.variables, &parsed.skip_include_variables);
                let key = keys::normalization_key(document, operation_name, &skip_include);
                let (operation, hit) = match self.lookup(&cache.normalization, flag, &key) {
                    Some(operation) => (operation, true),
                    None => {
                        let operation = Arc::new(self.engine.normalize(&parsed, &request.variables)?);
                        cache.normalization.put(key, operation.clone());
                        (operation, false)
                    }
                };
                hits.normalization = Some(hit);
                operation
            }
            (None, None) => return Err(RequestError::MissingQuery),
        };

        let key = keys::validation_key(&operation.hash);
        let validation = match self.lookup(&cache.validation, flag, &key) {
            Some(validation) => validation,
            None => {
                let validation = Arc::new(self.engine.validate(&operation));
                cache.validation.put(key, validation.clone());
                validation
            }
        };
        if !validation.is_valid() {
            return Err(RequestError::Validation(validation.errors.clone()));
        }

        let key = keys::plan_key(&operation.hash);
        let plan = match self.lookup(&cache.plan, flag, &key) {
            Some(plan) => {
                hits.plan = Some(true);
                plan
            }
            None => {
                hits.plan = Some(false);
                let plan = Arc::new(self.engine.plan(&operation)?);
                cache.plan.put(key, plan.clone());
                plan
            }
        };

        self.cost.check(plan.estimated_cost)?;

        Ok(PreparedOperation {
            operation,
            plan,
            cache_hits: hits,
        })
    }

    async fn persisted_operation(
        &self,
        cache: &OperationCache,
        flag: Option<&str>,
        persisted: &PersistedQuery,
        request: &GraphQLRequest,
        client: &ClientInfo,
    ) -> Result<(Arc<NormalizedOperation>, bool), RequestError> {
        let key = keys::persisted_key(
            &client.name,
            &persisted.sha256_hash,
            request.operation_name.as_deref(),
            &keys::boolean_variables(&request.variables),
        );
        if let Some(operation) = self.lookup(&cache.persisted, flag, &key) {
            return Ok((operation, true));
        }

        let Some(document) = self
            .persisted_store
            .fetch(&client.name, &persisted.sha256_hash)
            .await
        else {
            tracing::debug!(
                client = %client.name,
                sha256 = %persisted.sha256_hash,
                "Persisted operation not found"
            );
            return Err(RequestError::PersistedOperationNotFound);
        };

        let parsed = self.parse(cache, flag, &document, request.operation_name.as_deref())?;
        let operation = Arc::new(self.engine.normalize(&parsed, &request.variables)?);
        cache.persisted.put(key, operation.clone());
        Ok((operation, false))
    }

    fn parse(
        &self,
        cache: &OperationCache,
        flag: Option<&str>,
        document: &str,
        operation_name: Option<&str>,
    ) -> Result<Arc<ParsedOperation>, RequestError> {
        let key = keys::parse_key(document, operation_name);
        if let Some(parsed) = self.lookup(&cache.parse, flag, &key) {
            return Ok(parsed);
        }
        let parsed = Arc::new(self.engine.parse(document, operation_name)?);
        cache.parse.put(key, parsed.clone());
        Ok(parsed)
    }

    fn lookup<V: Clone>(&self, storage: &CacheStorage<V>, flag: Option<&str>, key: &OperationKey) -> Option<V> {
        let value = storage.get(key);
        let hit = value.is_some();
        self.observer.cache_lookup(storage.tier(), flag, hit);
        tracing::trace!(
            tier = storage.tier().as_str(),
            feature_flag = flag.unwrap_or(""),
            hit,
            "Operation cache lookup"
        );
        value
    }

    fn scope<'a>(&self, feature_flag: Option<&'a str>) -> (Arc<OperationCache>, Option<&'a str>) {
        match self.caches.scope(feature_flag) {
            Some(cache) => (cache, feature_flag),
            None => {
                tracing::debug!(feature_flag = ?feature_flag, "Unknown feature flag, using base graph caches");
                (self.caches.base(), None)
            }
        }
    }
}

/// `HIT` / `MISS` headers for the tiers a request went through.
pub fn cache_headers(hits: &CacheHits, headers: &mut HeaderMap) {
    let value = |hit: bool| HeaderValue::from_static(if hit { "HIT" } else { "MISS" });
    if let Some(hit) = hits.normalization {
        headers.insert(NORMALIZATION_CACHE_HEADER, value(hit));
    }
    if let Some(hit) = hits.persisted_operation {
        headers.insert(PERSISTED_OPERATION_CACHE_HEADER, value(hit));
    }
    if let Some(hit) = hits.plan {
        headers.insert(PLAN_CACHE_HEADER, value(hit));
    }
}
