//! Plan execution.
//!
//! # Responsibilities
//! - Run independent fetch steps concurrently, dependent steps after their dependencies
//! - Wrap every subgraph call in the retry executor and the (subgraph, feature flag) breaker
//! - Feed results into the merge stage in plan order once each wave has joined
//!
//! # Data Flow
//! ```text
//! Plan ──waves()──▶ wave 0 ─┬─▶ step A ─┐
//!                           └─▶ step B ─┴─join─▶ Merger (plan order)
//!                   wave 1 ───▶ step C (targets read from merged data) ─join─▶ Merger
//! ```
//!
//! # Design Decisions
//! - The merger is only touched between waves, so it never needs a lock
//! - Steps whose dependency produced no data are skipped and their fields nulled
//! - Cancellation is carried by a token passed down to every retry loop

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::traffic::TrafficTable;
use crate::fetch::plan::{with_timeouts, FetchStep, Plan};
use crate::fetch::transport::SubgraphTransport;
use crate::fetch::types::{FetchError, OperationKind, SubgraphRequest, SubgraphResponse};
use crate::merge::merger::{FetchResult, Merger};
use crate::observability::events::ResilienceObserver;
use crate::resilience::registry::{BreakerKey, BreakerRegistry};
use crate::resilience::retries::RetryExecutor;

/// Per-request execution inputs.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    pub feature_flag: Option<String>,
    /// Client variables, forwarded to subgraph requests.
    pub variables: Value,
    pub cancel: CancellationToken,
}

pub struct FetchOrchestrator {
    transport: Arc<dyn SubgraphTransport>,
    traffic: Arc<TrafficTable>,
    breakers: Arc<BreakerRegistry>,
    observer: Arc<dyn ResilienceObserver>,
    max_depth: usize,
}

impl FetchOrchestrator {
    pub fn new(
        transport: Arc<dyn SubgraphTransport>,
        traffic: Arc<TrafficTable>,
        breakers: Arc<BreakerRegistry>,
        observer: Arc<dyn ResilienceObserver>,
        max_depth: usize,
    ) -> Self {
        Self {
            transport,
            traffic,
            breakers,
            observer,
            max_depth,
        }
    }

    /// Execute `plan`, merging every result into `merger`.
    ///
    /// Subgraph failures end up as errors in the merger; only an invalid plan
    /// or a cancelled request is returned as `Err`.
    pub async fn execute(
        &self,
        plan: &Plan,
        ctx: &FetchContext,
        merger: &mut Merger,
    ) -> Result<(), FetchError> {
        let waves = plan.waves(self.max_depth)?;
        let position: HashMap<usize, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(pos, step)| (step.id, pos))
            .collect();
        let mut unresolved = vec![false; plan.steps.len()];

        for wave in waves {
            if ctx.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let mut calls = Vec::with_capacity(wave.len());
            for pos in wave {
                let step = &plan.steps[pos];

                let blocked = step
                    .depends_on
                    .iter()
                    .any(|id| position.get(id).is_some_and(|&dep| unresolved[dep]));
                if blocked {
                    tracing::debug!(
                        subgraph = %step.subgraph_name,
                        step = step.id,
                        "Skipping fetch, a dependency returned no data"
                    );
                    unresolved[pos] = true;
                    merger.skip(step);
                    continue;
                }

                let targets = merger.targets(&step.path);
                if !step.path.is_root() && targets.is_empty() {
                    continue;
                }

                match step.request.build(&targets, &ctx.variables) {
                    Ok(request) => {
                        calls.push(async move { (pos, self.fetch(plan.kind, step, request, ctx).await) })
                    }
                    Err(reason) => {
                        let err = FetchError::RequestBuild {
                            subgraph: step.subgraph_name.clone(),
                            reason,
                        };
                        tracing::warn!(subgraph = %step.subgraph_name, error = %err, "Cannot build subgraph request");
                        unresolved[pos] = true;
                        merger.merge(pos, step, FetchResult::from_outcome(step, Err(err)));
                    }
                }
            }

            for (pos, outcome) in join_all(calls).await {
                let step = &plan.steps[pos];
                let result = FetchResult::from_outcome(step, outcome);
                unresolved[pos] = result.is_failure() && result.data.is_none();
                merger.merge(pos, step, result);
            }

            if merger.is_aborted() {
                break;
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(())
    }

    async fn fetch(
        &self,
        kind: OperationKind,
        step: &FetchStep,
        request: SubgraphRequest,
        ctx: &FetchContext,
    ) -> Result<SubgraphResponse, FetchError> {
        let rule = self.traffic.rule_for(&step.subgraph_name);
        let key = BreakerKey::new(step.subgraph_id.clone(), ctx.feature_flag.clone());
        let breaker = self.breakers.get(&step.subgraph_name, &key);
        let request = with_timeouts(request, &rule.timeouts);

        let executor = RetryExecutor::new(
            step.subgraph_name.clone(),
            rule,
            breaker,
            self.observer.clone(),
        );
        let span = tracing::debug_span!(
            "subgraph_fetch",
            subgraph = %step.subgraph_name,
            feature_flag = ctx.feature_flag.as_deref().unwrap_or(""),
            path = %step.path,
        );

        executor
            .execute(kind, &ctx.cancel, || {
                let transport = self.transport.clone();
                let request = request.clone();
                async move { transport.perform(request).await }
            })
            .instrument(span)
            .await
    }
}
