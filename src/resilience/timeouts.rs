//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every subgraph attempt with the rule's request timeout
//! - Turn an elapsed deadline into a transport timeout error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeouts are per attempt, never per logical call
//! - A zero duration disables the deadline

use std::future::Future;
use std::time::Duration;

use crate::fetch::types::TransportError;

/// Run `fut` under `limit`. Elapsed deadlines surface as `TransportErrorKind::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timeout(limit)),
    }
}
