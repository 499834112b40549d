//! Estimated cost gate.

use crate::config::schema::{CostControlConfig, CostMode};
use crate::observability::metrics;
use crate::pipeline::types::RequestError;

pub const COST_HEADER: &str = "x-cost-estimated";

pub struct CostGate {
    config: CostControlConfig,
}

impl CostGate {
    pub fn new(config: CostControlConfig) -> Self {
        Self { config }
    }

    /// Record the plan's estimated cost and, in `enforce` mode, reject it
    /// above the limit. `measure` mode never rejects.
    pub fn check(&self, estimated_cost: u64) -> Result<(), RequestError> {
        if !self.config.enabled {
            return Ok(());
        }
        metrics::record_estimated_cost(estimated_cost);

        let limit = self.config.max_estimated_limit;
        if estimated_cost <= limit {
            return Ok(());
        }
        match self.config.mode {
            CostMode::Enforce => {
                tracing::info!(cost = estimated_cost, limit, "Rejecting operation above cost limit");
                Err(RequestError::CostLimit {
                    cost: estimated_cost,
                    limit,
                })
            }
            CostMode::Measure => {
                tracing::debug!(cost = estimated_cost, limit, "Operation above cost limit (measure mode)");
                Ok(())
            }
        }
    }

    pub fn expose_headers(&self) -> bool {
        self.config.enabled && self.config.expose_headers
    }
}
