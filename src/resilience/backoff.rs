//! Backoff algorithms.

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

/// Known backoff algorithm names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffAlgorithm {
    /// Exponential from `interval`, capped, plus up to 10% jitter.
    BackoffJitter,
    /// Always `interval`.
    Constant,
}

impl BackoffAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffAlgorithm::BackoffJitter => "backoff_jitter",
            BackoffAlgorithm::Constant => "constant",
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay(&self, retry: u32, interval: Duration, max: Duration) -> Duration {
        match self {
            BackoffAlgorithm::BackoffJitter => calculate_backoff(
                retry,
                interval.as_millis() as u64,
                max.as_millis() as u64,
            ),
            BackoffAlgorithm::Constant => interval,
        }
    }
}

impl FromStr for BackoffAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backoff_jitter" => Ok(BackoffAlgorithm::BackoffJitter),
            "constant" => Ok(BackoffAlgorithm::Constant),
            other => Err(other.to_string()),
        }
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
