//! Failure classification shared by retry, breaker and error propagation.
//!
//! # Responsibilities
//! - Turn an attempt outcome into a `RetryContext` (`statusCode` + `error`)
//! - Provide the helper predicates exposed to retry expressions
//! - Decide what counts as a failure for the circuit breaker
//!
//! # Design Decisions
//! - Typed transport error kinds first, message matching only as fallback
//! - Timeouts are never connection errors (they have their own helper)
//! - 429 is not a retryable status code by default; it only retries when the
//!   expression names it explicitly

use crate::fetch::types::{SubgraphResponse, TransportError, TransportErrorKind};

/// Outcome of one attempt as seen by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// HTTP status, `0` when there was no response.
    pub status_code: u16,
    /// Transport error message, empty when there was none.
    pub error: String,
    pub error_kind: Option<TransportErrorKind>,
}

impl RetryContext {
    /// Build a context from a transport result.
    pub fn load(outcome: &Result<SubgraphResponse, TransportError>) -> Self {
        match outcome {
            Ok(response) => Self::from_status(response.status),
            Err(err) => Self::from_error(err),
        }
    }

    pub fn from_status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub fn from_error(err: &TransportError) -> Self {
        Self {
            status_code: 0,
            error: err.message.clone(),
            error_kind: Some(err.kind),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_kind.is_some() || !self.error.is_empty()
    }

    fn message_contains(&self, needle: &str) -> bool {
        self.error.to_lowercase().contains(needle)
    }

    pub fn is_http_read_timeout(&self) -> bool {
        self.error_kind == Some(TransportErrorKind::ResponseHeaderTimeout)
            || self.message_contains("timeout awaiting response headers")
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.error_kind,
            Some(TransportErrorKind::Timeout) | Some(TransportErrorKind::ResponseHeaderTimeout)
        ) || self.is_http_read_timeout()
            || self.message_contains("deadline exceeded")
            || self.message_contains("timed out")
    }

    pub fn is_connection_refused(&self) -> bool {
        self.error_kind == Some(TransportErrorKind::ConnectionRefused)
            || self.message_contains("connection refused")
    }

    pub fn is_connection_reset(&self) -> bool {
        self.error_kind == Some(TransportErrorKind::ConnectionReset)
            || self.message_contains("connection reset")
    }

    pub fn is_connection_error(&self) -> bool {
        if !self.has_error() || self.is_timeout() {
            return false;
        }
        self.is_connection_refused()
            || self.is_connection_reset()
            || self.error_kind == Some(TransportErrorKind::Dns)
            || self.message_contains("no such host")
            || self.message_contains("broken pipe")
            || self.message_contains("network is unreachable")
    }

    pub fn is_unexpected_eof(&self) -> bool {
        self.error_kind == Some(TransportErrorKind::UnexpectedEof)
            || self.message_contains("unexpected eof")
    }

    pub fn is_5xx_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }

    pub fn is_retryable_status_code(&self) -> bool {
        matches!(self.status_code, 500 | 502 | 503 | 504)
    }

    /// Failure judgment for the circuit breaker and error accounting.
    pub fn is_failure(&self) -> bool {
        self.has_error() || self.is_5xx_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: TransportErrorKind, message: &str) -> RetryContext {
        RetryContext::from_error(&TransportError::new(kind, message))
    }

    #[test]
    fn test_status_helpers() {
        let ctx = RetryContext::from_status(502);
        assert!(ctx.is_5xx_error());
        assert!(ctx.is_retryable_status_code());
        assert!(ctx.is_failure());

        let ctx = RetryContext::from_status(429);
        assert!(!ctx.is_retryable_status_code());
        assert!(!ctx.is_failure());

        let ctx = RetryContext::from_status(501);
        assert!(ctx.is_5xx_error());
        assert!(!ctx.is_retryable_status_code());
    }

    #[test]
    fn test_timeout_is_not_connection_error() {
        let ctx = err(TransportErrorKind::ResponseHeaderTimeout, "timeout awaiting response headers");
        assert!(ctx.is_timeout());
        assert!(ctx.is_http_read_timeout());
        assert!(!ctx.is_connection_error());
        assert!(ctx.is_failure());
    }

    #[test]
    fn test_connection_errors_by_kind_and_message() {
        assert!(err(TransportErrorKind::ConnectionRefused, "dial failed").is_connection_refused());
        assert!(err(TransportErrorKind::Other, "read: Connection Reset by peer").is_connection_reset());
        assert!(err(TransportErrorKind::Other, "lookup products: no such host").is_connection_error());
        assert!(!err(TransportErrorKind::Other, "something else").is_connection_error());
        assert!(!RetryContext::from_status(200).is_connection_error());
    }

    #[test]
    fn test_unexpected_eof() {
        assert!(err(TransportErrorKind::UnexpectedEof, "eof").is_unexpected_eof());
        assert!(err(TransportErrorKind::Other, "unexpected EOF").is_unexpected_eof());
    }
}
