//! Retry logic.
//!
//! # Responsibilities
//! - Decide retryability from the compiled expression
//! - Execute retries with the configured backoff, honoring `Retry-After` on 429
//! - Enforce the sleep budget (`max_duration`) of one logical call
//! - Consult the circuit breaker before every attempt and report after it
//!
//! # Design Decisions
//! - Never retry mutations, whatever the policy says
//! - Unexpected EOF is always retryable, the connection was simply reused too late
//! - A breaker denial ends the call immediately; it is never retried
//! - Cancellation is checked at every suspension point

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::traffic::ResolvedRule;
use crate::fetch::types::{FetchError, OperationKind, SubgraphResponse, TransportError};
use crate::observability::events::ResilienceObserver;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::classify::RetryContext;
use crate::resilience::timeouts::with_timeout;

/// Record handed to retry callbacks before each retry sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// Retry number, 1 for the first retry (the second call).
    pub count: u32,
    pub last_error: Option<TransportError>,
    /// Status of the failed attempt, 0 when there was no response.
    pub last_status_code: u16,
    pub sleep_duration: Duration,
}

pub type OnRetry = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Retry executor for one subgraph call site.
pub struct RetryExecutor {
    subgraph: String,
    rule: Arc<ResolvedRule>,
    breaker: Option<Arc<CircuitBreaker>>,
    observer: Arc<dyn ResilienceObserver>,
    on_retry: Option<OnRetry>,
}

impl RetryExecutor {
    pub fn new(
        subgraph: impl Into<String>,
        rule: Arc<ResolvedRule>,
        breaker: Option<Arc<CircuitBreaker>>,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Self {
        Self {
            subgraph: subgraph.into(),
            rule,
            breaker,
            observer,
            on_retry: None,
        }
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    /// Run `call` with the subgraph's retry policy.
    ///
    /// Returns the last outcome unchanged once no further retry applies.
    /// Non-2xx responses are returned as `Ok`; only failures below HTTP are errors.
    pub async fn execute<F, Fut>(
        &self,
        kind: OperationKind,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<SubgraphResponse, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<SubgraphResponse, TransportError>>,
    {
        let policy = &self.rule.retry;
        let retries_apply = policy.enabled && kind != OperationKind::Mutation;
        let mut retries = 0u32;
        let mut slept = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let token = match &self.breaker {
                Some(breaker) => match breaker.allow() {
                    Some(token) => Some(token),
                    None => {
                        return Err(FetchError::CircuitOpen {
                            subgraph: self.subgraph.clone(),
                        })
                    }
                },
                None => None,
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let (Some(breaker), Some(token)) = (&self.breaker, token) {
                        breaker.release(token);
                    }
                    return Err(FetchError::Cancelled);
                }
                outcome = with_timeout(self.rule.timeouts.request, call()) => outcome,
            };

            let ctx = RetryContext::load(&outcome);
            if let (Some(breaker), Some(token)) = (&self.breaker, token) {
                breaker.report(token, !ctx.is_failure());
            }

            if !retries_apply || retries >= policy.max_attempts {
                return outcome.map_err(FetchError::from);
            }
            if !(ctx.is_unexpected_eof() || policy.expression.evaluate(&ctx)) {
                return outcome.map_err(FetchError::from);
            }

            let backoff = policy
                .algorithm
                .delay(retries + 1, policy.interval, policy.max_duration);
            let delay = match &outcome {
                Ok(response) if response.status == 429 => response.retry_after().unwrap_or(backoff),
                _ => backoff,
            };
            if slept + delay > policy.max_duration {
                tracing::debug!(
                    subgraph = %self.subgraph,
                    retries,
                    slept = ?slept,
                    next_delay = ?delay,
                    "Retry budget exhausted"
                );
                return outcome.map_err(FetchError::from);
            }

            retries += 1;
            slept += delay;
            let attempt = RetryAttempt {
                count: retries,
                last_error: outcome.as_ref().err().cloned(),
                last_status_code: ctx.status_code,
                sleep_duration: delay,
            };
            tracing::info!(
                subgraph = %self.subgraph,
                attempt = retries,
                delay = ?delay,
                status = ctx.status_code,
                error = %ctx.error,
                "Retrying subgraph request"
            );
            self.observer.retry_attempt(&self.subgraph, &attempt);
            if let Some(on_retry) = &self.on_retry {
                on_retry(&attempt);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
