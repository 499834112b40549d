//! Collaborators the pipeline delegates to on cache misses.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::cache::keys::sha256_hex;
use crate::fetch::plan::Plan;
use crate::pipeline::types::{EngineError, NormalizedOperation, ParsedOperation, ValidationResult};

/// GraphQL parsing, normalization, validation and planning.
///
/// Every method is a pure function of its inputs, which is what makes the
/// results cacheable.
pub trait OperationEngine: Send + Sync {
    fn parse(&self, document: &str, operation_name: Option<&str>) -> Result<ParsedOperation, EngineError>;

    /// Only the variables listed in `parsed.skip_include_variables` may
    /// influence the result.
    fn normalize(&self, parsed: &ParsedOperation, variables: &Value) -> Result<NormalizedOperation, EngineError>;

    fn validate(&self, operation: &NormalizedOperation) -> ValidationResult;

    fn plan(&self, operation: &NormalizedOperation) -> Result<Plan, EngineError>;
}

/// Registry of persisted operation documents.
#[async_trait]
pub trait PersistedOperationStore: Send + Sync {
    /// Document registered by `client_name` under `sha256`.
    async fn fetch(&self, client_name: &str, sha256: &str) -> Option<String>;
}

/// Persisted operations registered in process, per client.
#[derive(Default)]
pub struct InMemoryPersistedStore {
    operations: DashMap<(String, String), String>,
}

impl InMemoryPersistedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` for `client_name`; returns its hex SHA-256.
    pub fn register(&self, client_name: &str, document: &str) -> String {
        let hash = sha256_hex(document);
        self.operations
            .insert((client_name.to_string(), hash.clone()), document.to_string());
        hash
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[async_trait]
impl PersistedOperationStore for InMemoryPersistedStore {
    async fn fetch(&self, client_name: &str, sha256: &str) -> Option<String> {
        self.operations
            .get(&(client_name.to_string(), sha256.to_ascii_lowercase()))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_is_scoped_by_client() {
        let store = InMemoryPersistedStore::new();
        let hash = store.register("web", "{ employees { id } }");

        assert_eq!(store.fetch("web", &hash).await.as_deref(), Some("{ employees { id } }"));
        assert_eq!(store.fetch("web", &hash.to_uppercase()).await.as_deref(), Some("{ employees { id } }"));
        assert_eq!(store.fetch("ios", &hash).await, None);
        assert_eq!(store.len(), 1);
    }
}
