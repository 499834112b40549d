//! Circuit breaker for subgraph protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: subgraph assumed down, requests fail fast
//! - Half-Open: a bounded batch of trials tests recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= request_threshold AND error% >= threshold (rolling window)
//! Open → Half-Open: first allow() after sleep_window (no timer)
//! Half-Open → Closed: every trial of the batch succeeded
//! Half-Open → Open: any trial failed
//! ```
//!
//! # Design Decisions
//! - One breaker per (subgraph, feature flag), see `registry.rs`
//! - Closed counts requests at `allow()`, so in-flight calls already weigh on the threshold
//! - Tokens carry the phase they were issued in; reports from an earlier phase are ignored
//! - Status-changed events fire on open/close flips only, under the lock, once per transition

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::events::ResilienceObserver;
use crate::resilience::registry::BreakerKey;
use crate::resilience::rolling_window::{RollingWindow, WindowTotals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Permission to perform one call. Hand it back through `report` or `release`.
#[derive(Debug)]
#[must_use = "an allowed call must be reported or released"]
pub struct AllowToken {
    phase: u64,
    trial: bool,
}

impl AllowToken {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    /// Bumped on every transition.
    phase: u64,
    trials_remaining: u32,
    trial_successes: u32,
}

pub struct CircuitBreaker {
    key: BreakerKey,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    observer: Arc<dyn ResilienceObserver>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(key: BreakerKey, config: CircuitBreakerConfig, observer: Arc<dyn ResilienceObserver>) -> Self {
        let window = RollingWindow::new(config.rolling_duration, config.num_buckets, Instant::now());
        Self {
            key,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window,
                opened_at: None,
                phase: 0,
                trials_remaining: 0,
                trial_successes: 0,
            }),
            observer,
        }
    }

    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    /// Current state, without applying the lazy Open → Half-Open check.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn totals(&self) -> WindowTotals {
        self.inner.lock().window.totals(Instant::now())
    }

    /// Ask permission for one call. `None` means the call must not be made.
    pub fn allow(&self) -> Option<AllowToken> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == BreakerState::Open {
            let reopen_at = inner.opened_at.map(|at| at + self.config.sleep_window);
            if reopen_at.is_some_and(|at| now >= at) {
                inner.state = BreakerState::HalfOpen;
                inner.phase += 1;
                inner.trials_remaining = self.config.half_open_attempts;
                inner.trial_successes = 0;
                tracing::info!(
                    subgraph = %self.key.subgraph_id,
                    feature_flag = self.key.feature_flag.as_deref().unwrap_or(""),
                    trials = self.config.half_open_attempts,
                    "Circuit breaker half-open, probing subgraph"
                );
            }
        }

        let state = inner.state;
        match state {
            BreakerState::Closed => {
                inner.window.record_request(now);
                Some(AllowToken {
                    phase: inner.phase,
                    trial: false,
                })
            }
            BreakerState::HalfOpen if inner.trials_remaining > 0 => {
                inner.trials_remaining -= 1;
                Some(AllowToken {
                    phase: inner.phase,
                    trial: true,
                })
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                drop(inner);
                tracing::debug!(
                    subgraph = %self.key.subgraph_id,
                    feature_flag = self.key.feature_flag.as_deref().unwrap_or(""),
                    "Circuit breaker open, request callback did not execute"
                );
                self.observer.breaker_short_circuit(&self.key);
                None
            }
        }
    }

    /// Record the outcome of an allowed call.
    pub fn report(&self, token: AllowToken, success: bool) {
        let mut inner = self.inner.lock();
        if token.phase != inner.phase {
            return;
        }
        let now = Instant::now();

        let state = inner.state;
        match state {
            BreakerState::Closed => {
                if success {
                    return;
                }
                inner.window.record_error(now);
                let totals = inner.window.totals(now);
                let threshold = self.config.error_threshold_percentage;
                if totals.requests >= self.config.request_threshold
                    && totals.errors * 100 >= threshold * totals.requests
                {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.phase += 1;
                    tracing::warn!(
                        subgraph = %self.key.subgraph_id,
                        feature_flag = self.key.feature_flag.as_deref().unwrap_or(""),
                        requests = totals.requests,
                        errors = totals.errors,
                        "Circuit breaker opened"
                    );
                    self.observer.breaker_status_changed(&self.key, true);
                }
            }
            BreakerState::HalfOpen => {
                if !success {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.phase += 1;
                    inner.trials_remaining = 0;
                    tracing::info!(
                        subgraph = %self.key.subgraph_id,
                        feature_flag = self.key.feature_flag.as_deref().unwrap_or(""),
                        "Circuit breaker trial failed, reopening"
                    );
                    return;
                }
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_attempts {
                    inner.state = BreakerState::Closed;
                    inner.opened_at = None;
                    inner.phase += 1;
                    inner.window.clear();
                    tracing::info!(
                        subgraph = %self.key.subgraph_id,
                        feature_flag = self.key.feature_flag.as_deref().unwrap_or(""),
                        "Circuit breaker closed"
                    );
                    self.observer.breaker_status_changed(&self.key, false);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Give back a token whose call never produced an outcome (cancelled).
    pub fn release(&self, token: AllowToken) {
        let mut inner = self.inner.lock();
        if token.trial && token.phase == inner.phase && inner.state == BreakerState::HalfOpen {
            inner.trials_remaining += 1;
        }
    }
}
