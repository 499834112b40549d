//! Subgraph transport.
//!
//! The transport performs exactly one HTTP round trip. Retries, breakers and
//! per-attempt deadlines are layered on top by the resilience module.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use crate::fetch::types::{SubgraphRequest, SubgraphResponse, TransportError, TransportErrorKind};

#[async_trait]
pub trait SubgraphTransport: Send + Sync {
    async fn perform(&self, request: SubgraphRequest) -> Result<SubgraphResponse, TransportError>;
}

/// reqwest-backed transport with a shared connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `dial` bounds connection establishment for every subgraph.
    pub fn new(dial: Duration) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if !dial.is_zero() {
            builder = builder.connect_timeout(dial);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SubgraphTransport for HttpTransport {
    async fn perform(&self, request: SubgraphRequest) -> Result<SubgraphResponse, TransportError> {
        let mut headers = request.headers;
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));

        let send = self
            .client
            .post(&request.url)
            .headers(headers)
            .json(&request.body)
            .send();

        let header_timeout = request.timeouts.response_header;
        let response = if header_timeout.is_zero() {
            send.await.map_err(classify)?
        } else {
            match tokio::time::timeout(header_timeout, send).await {
                Ok(result) => result.map_err(classify)?,
                Err(_) => {
                    return Err(TransportError::new(
                        TransportErrorKind::ResponseHeaderTimeout,
                        "timeout awaiting response headers",
                    ))
                }
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        tracing::trace!(url = %request.url, status, bytes = body.len(), "Subgraph responded");

        Ok(SubgraphResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Map a reqwest failure onto the kinds retry expressions can test for.
fn classify(err: reqwest::Error) -> TransportError {
    let message = err.to_string();

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            let kind = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    Some(TransportErrorKind::ConnectionReset)
                }
                io::ErrorKind::UnexpectedEof => Some(TransportErrorKind::UnexpectedEof),
                io::ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
                _ => None,
            };
            if let Some(kind) = kind {
                return TransportError::new(kind, message);
            }
        }
        let text = cause.to_string();
        if text.contains("connection closed before message completed") {
            return TransportError::new(TransportErrorKind::UnexpectedEof, message);
        }
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportError::new(TransportErrorKind::Dns, message);
        }
        source = cause.source();
    }

    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, message)
}
