//! Gateway facade.
//!
//! # Responsibilities
//! - Wire one configuration generation together: traffic table, breakers,
//!   operation caches, pipeline and fetch orchestrator
//! - Serve a GraphQL request end to end: prepare, fetch, merge
//! - Swap generations atomically on configuration reload
//! - Warm the caches of the current generation
//!
//! # Data Flow
//! ```text
//! GraphQLRequest + RequestContext
//!     → Generation (ArcSwap load, one per request)
//!     → OperationProcessor::prepare ──error──▶ GatewayResponse (RequestError status)
//!     → FetchOrchestrator::execute → Merger
//!     → GatewayResponse { status, headers (cache, cost, propagated), body }
//!
//! Config update (watcher) → validate → build Generation → ArcSwap::store
//! ```
//!
//! # Design Decisions
//! - A request keeps the generation it started with, even across a reload
//! - A failed reload keeps the current generation
//! - Breakers and caches start empty in a new generation

use std::sync::Arc;

use arc_swap::ArcSwap;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::CacheRegistry;
use crate::config::loader::ConfigError;
use crate::config::schema::{ErrorPropagationConfig, GatewayConfig};
use crate::config::traffic::TrafficTable;
use crate::config::validation::validate_config;
use crate::fetch::{FetchContext, FetchError, FetchOrchestrator, SubgraphTransport};
use crate::merge::{GraphQLError, GraphQLResponse, Merger};
use crate::observability::events::ResilienceObserver;
use crate::pipeline::cost::{CostGate, COST_HEADER};
use crate::pipeline::processor::cache_headers;
use crate::pipeline::{ClientInfo, GraphQLRequest, OperationEngine, OperationProcessor, PersistedOperationStore, RequestError};
use crate::resilience::registry::BreakerRegistry;
use crate::warmup::{self, CacheWarmer, WarmupError, WarmupReport, WarmupSettings};

/// Status answered when the client went away before the response was ready.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Collaborators shared by every generation.
#[derive(Clone)]
pub struct GatewayParts {
    pub engine: Arc<dyn OperationEngine>,
    pub persisted_store: Arc<dyn PersistedOperationStore>,
    pub transport: Arc<dyn SubgraphTransport>,
    pub observer: Arc<dyn ResilienceObserver>,
}

/// Per-request inputs besides the GraphQL request itself.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client: ClientInfo,
    pub feature_flag: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(client: ClientInfo) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    pub fn with_feature_flag(mut self, flag: impl Into<String>) -> Self {
        self.feature_flag = Some(flag.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Response handed back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    fn from_request_error(error: &RequestError, headers: HeaderMap) -> Self {
        Self {
            status: error.status_code(),
            headers,
            body: GraphQLResponse::from_errors(error.to_graphql_errors()).to_bytes(),
        }
    }

    /// Body parsed back into JSON; `Value::Null` if it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// Everything derived from one configuration.
struct Generation {
    config: Arc<GatewayConfig>,
    propagation: Arc<ErrorPropagationConfig>,
    traffic: Arc<TrafficTable>,
    processor: Arc<OperationProcessor>,
    orchestrator: FetchOrchestrator,
}

impl Generation {
    fn build(config: GatewayConfig, parts: &GatewayParts) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let traffic = Arc::new(TrafficTable::build(&config.traffic_shaping)?);

        let breakers = Arc::new(BreakerRegistry::new(traffic.clone(), parts.observer.clone()));
        let caches = Arc::new(CacheRegistry::new(&config.cache, &config.feature_flags));
        let processor = Arc::new(OperationProcessor::new(
            parts.engine.clone(),
            parts.persisted_store.clone(),
            caches,
            CostGate::new(config.cost_control.clone()),
            parts.observer.clone(),
        ));
        let orchestrator = FetchOrchestrator::new(
            parts.transport.clone(),
            traffic.clone(),
            breakers,
            parts.observer.clone(),
            config.max_plan_depth,
        );

        Ok(Self {
            propagation: Arc::new(config.error_propagation.clone()),
            config: Arc::new(config),
            traffic,
            processor,
            orchestrator,
        })
    }
}

pub struct Gateway {
    parts: GatewayParts,
    current: ArcSwap<Generation>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, parts: GatewayParts) -> Result<Self, ConfigError> {
        let generation = Generation::build(config, &parts)?;
        Ok(Self {
            parts,
            current: ArcSwap::from_pointee(generation),
        })
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.current.load().config.clone()
    }

    pub fn traffic(&self) -> Arc<TrafficTable> {
        self.current.load().traffic.clone()
    }

    /// Operation caches of the current generation.
    pub fn caches(&self) -> Arc<CacheRegistry> {
        self.current.load().processor.caches().clone()
    }

    /// Build a generation from `config` and make it current. On error the
    /// current generation stays in place.
    pub fn reload(&self, config: GatewayConfig) -> Result<(), ConfigError> {
        let generation = Generation::build(config, &self.parts)?;
        self.current.store(Arc::new(generation));
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Apply configurations from `updates` until the channel closes or
    /// shutdown is signalled.
    pub async fn run_config_updates(
        &self,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => {
                        if let Err(e) = self.reload(config) {
                            tracing::error!(error = %e, "Rejected configuration update, keeping current configuration");
                        }
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Configuration update loop stopped");
    }

    /// Warm the current generation's caches from the configured source.
    /// Returns `None` when warmup is disabled.
    pub async fn warm_up(&self) -> Result<Option<WarmupReport>, WarmupError> {
        let generation = self.current.load_full();
        let config = &generation.config.cache_warmup;
        if !config.enabled {
            return Ok(None);
        }
        let source = warmup::from_config(&config.source)?;
        let warmer = CacheWarmer::new(generation.processor.clone(), self.parts.observer.clone());
        let report = warmer.warm(source.as_ref(), WarmupSettings::from(config)).await?;
        Ok(Some(report))
    }

    /// Serve one GraphQL request.
    pub async fn execute(&self, request: &GraphQLRequest, ctx: RequestContext) -> GatewayResponse {
        let generation = self.current.load_full();

        // Unknown flags are served by the base graph, breakers included.
        let feature_flag = ctx
            .feature_flag
            .filter(|flag| generation.processor.caches().scope(Some(flag.as_str())).is_some());

        let span = tracing::info_span!(
            "graphql_request",
            request_id = %Uuid::new_v4(),
            operation_name = request.operation_name.as_deref().unwrap_or(""),
            client = %ctx.client.name,
            feature_flag = feature_flag.as_deref().unwrap_or(""),
        );
        let fetch_ctx = FetchContext {
            feature_flag,
            variables: request.variables.clone(),
            cancel: ctx.cancel,
        };
        Self::serve(&generation, request, &ctx.client, fetch_ctx)
            .instrument(span)
            .await
    }

    async fn serve(
        generation: &Generation,
        request: &GraphQLRequest,
        client: &ClientInfo,
        fetch_ctx: FetchContext,
    ) -> GatewayResponse {
        let mut headers = HeaderMap::new();
        let prepared = match generation
            .processor
            .prepare(request, client, fetch_ctx.feature_flag.as_deref())
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!(error = %e, status = e.status_code(), "Operation rejected");
                return GatewayResponse::from_request_error(&e, headers);
            }
        };

        cache_headers(&prepared.cache_hits, &mut headers);
        if generation.processor.cost().expose_headers() {
            headers.insert(COST_HEADER, HeaderValue::from(prepared.plan.estimated_cost));
        }

        let mut merger = Merger::new(generation.propagation.clone(), &generation.config.header_propagation);
        match generation
            .orchestrator
            .execute(&prepared.plan, &fetch_ctx, &mut merger)
            .await
        {
            Ok(()) => {}
            Err(FetchError::Cancelled) => {
                tracing::debug!("Request cancelled by client");
                return GatewayResponse {
                    status: CLIENT_CLOSED_REQUEST,
                    headers,
                    body: GraphQLResponse::from_errors(vec![GraphQLError::new("request cancelled")]).to_bytes(),
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "Plan execution failed");
                merger.fail(GraphQLError::new(e.to_string()));
            }
        }

        let merged = merger.finish();
        headers.extend(merged.headers);
        GatewayResponse {
            status: 200,
            headers,
            body: merged.response.to_bytes(),
        }
    }
}
