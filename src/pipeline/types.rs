//! Operation pipeline types and error definitions.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::cache::OperationKey;
use crate::fetch::plan::Plan;
use crate::fetch::types::OperationKind;
use crate::merge::graphql::GraphQLError;

/// Persisted-operation reference carried in `extensions.persistedQuery`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
    #[serde(default)]
    pub version: u32,
    pub sha256_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestExtensions {
    #[serde(rename = "persistedQuery")]
    pub persisted_query: Option<PersistedQuery>,
}

/// GraphQL request as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub extensions: RequestExtensions,
}

impl GraphQLRequest {
    pub fn query(document: impl Into<String>) -> Self {
        Self {
            query: Some(document.into()),
            ..Self::default()
        }
    }

    pub fn persisted(sha256: impl Into<String>) -> Self {
        Self {
            extensions: RequestExtensions {
                persisted_query: Some(PersistedQuery {
                    version: 1,
                    sha256_hash: sha256.into(),
                }),
            },
            ..Self::default()
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Client identity, from `graphql-client-name` / `graphql-client-version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        Self {
            name: read("graphql-client-name"),
            version: read("graphql-client-version"),
        }
    }
}

/// Engine parse result. Cached in the parse tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOperation {
    pub document: Arc<str>,
    pub operation_name: Option<String>,
    pub kind: OperationKind,
    /// Variables referenced by `@skip(if:)` / `@include(if:)`.
    pub skip_include_variables: Vec<String>,
}

/// Normalized operation. Cached in the normalization and persisted tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOperation {
    pub document: Arc<str>,
    pub operation_name: Option<String>,
    pub kind: OperationKind,
    /// Content hash of `document`; keys the validation and plan tiers.
    pub hash: OperationKey,
}

/// Engine validation result. Cached in the validation tier, valid or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Failures reported by the operation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Normalize(String),

    #[error("{0}")]
    Plan(String),
}

/// Client-facing request failure. Carries the HTTP status to answer with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("empty request body")]
    MissingQuery,

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Normalize(String),

    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("PersistedQueryNotFound")]
    PersistedOperationNotFound,

    #[error("The estimated query cost {cost} exceeds the maximum allowed limit {limit}")]
    CostLimit { cost: u64, limit: u64 },

    #[error("{0}")]
    Plan(String),
}

impl RequestError {
    pub fn status_code(&self) -> u16 {
        match self {
            RequestError::PersistedOperationNotFound => 200,
            RequestError::Plan(_) => 500,
            _ => 400,
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            RequestError::PersistedOperationNotFound => Some("PERSISTED_QUERY_NOT_FOUND"),
            RequestError::Parse(_) => Some("GRAPHQL_PARSE_FAILED"),
            RequestError::Validation(_) => Some("GRAPHQL_VALIDATION_FAILED"),
            _ => None,
        }
    }

    pub fn to_graphql_errors(&self) -> Vec<GraphQLError> {
        let messages = match self {
            RequestError::Validation(errors) if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        };
        messages
            .into_iter()
            .map(|message| {
                let mut error = GraphQLError::new(message);
                if let Some(code) = self.code() {
                    error.set_extension("code", json!(code));
                }
                error
            })
            .collect()
    }
}

impl From<EngineError> for RequestError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Parse(m) => RequestError::Parse(m),
            EngineError::Normalize(m) => RequestError::Normalize(m),
            EngineError::Plan(m) => RequestError::Plan(m),
        }
    }
}

/// Cache hit indicators surfaced as response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheHits {
    pub normalization: Option<bool>,
    pub persisted_operation: Option<bool>,
    pub plan: Option<bool>,
}

/// Everything the fetch stage needs about a prepared operation.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub operation: Arc<NormalizedOperation>,
    pub plan: Arc<Plan>,
    pub cache_hits: CacheHits,
}
