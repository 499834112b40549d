//! Subgraph call types and error definitions.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::TimeoutConfig;

/// GraphQL operation kind. Only queries and subscriptions are ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

/// A single HTTP round trip to a subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphRequest {
    /// Subgraph routing URL.
    pub url: String,
    pub headers: HeaderMap,
    /// GraphQL request body (`query`, `variables`, ...).
    pub body: serde_json::Value,
    /// Transport deadlines of the subgraph's traffic rule.
    pub timeouts: TimeoutConfig,
}

impl SubgraphRequest {
    pub fn new(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            body,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Raw subgraph response as produced by the transport.
#[derive(Debug, Clone, Default)]
pub struct SubgraphResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl SubgraphResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Delay requested through a non-zero `Retry-After` header (delta seconds).
    pub fn retry_after(&self) -> Option<Duration> {
        let seconds: u64 = self
            .headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        (seconds > 0).then(|| Duration::from_secs(seconds))
    }
}

/// Classified transport failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    ResponseHeaderTimeout,
    UnexpectedEof,
    Dns,
    Other,
}

/// Failure below HTTP: there is no response to report a status code from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Per-attempt deadline exceeded.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }
}

/// Errors that can end a subgraph fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection-level failure after retries were exhausted or not applicable.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The breaker denied the call; the transport was never invoked.
    #[error("Circuit breaker open, request callback did not execute")]
    CircuitOpen { subgraph: String },

    /// The client request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The plan cannot be executed (cycle, unknown dependency, too deep).
    #[error("invalid fetch plan: {0}")]
    InvalidPlan(String),

    /// The step's request builder failed.
    #[error("failed to build request for subgraph '{subgraph}': {reason}")]
    RequestBuild { subgraph: String, reason: String },
}

impl FetchError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FetchError::CircuitOpen { .. })
    }

    /// Transport-level failures never have an HTTP status to report.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::CircuitOpen { .. } | FetchError::Cancelled
        )
    }
}
