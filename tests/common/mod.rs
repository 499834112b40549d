//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use subgraph_resilience::cache::{keys, CacheTier};
use subgraph_resilience::fetch::plan::{EntityRequest, FieldShape, PathElement, ResponsePath, StaticRequest};
use subgraph_resilience::fetch::{FetchStep, OperationKind, Plan, SubgraphRequest, SubgraphResponse, SubgraphTransport, TransportError};
use subgraph_resilience::observability::ResilienceObserver;
use subgraph_resilience::pipeline::types::{EngineError, NormalizedOperation, ParsedOperation, ValidationResult};
use subgraph_resilience::pipeline::OperationEngine;
use subgraph_resilience::resilience::registry::BreakerKey;
use subgraph_resilience::resilience::retries::RetryAttempt;

// ---------------------------------------------------------------------------
// Operation engine
// ---------------------------------------------------------------------------

/// Engine for tests.
///
/// Documents are compared with whitespace collapsed. Planning looks up a plan
/// registered for the document, or produces an empty plan. Skip/include
/// values are appended to the normalized document, so operations differing
/// only in them get different normalized hashes. Fields called
/// `unknownField` fail validation.
#[derive(Default)]
pub struct StubEngine {
    plans: HashMap<String, Plan>,
    pub parses: AtomicUsize,
    pub normalizations: AtomicUsize,
    pub validations: AtomicUsize,
    pub plans_built: AtomicUsize,
}

pub fn collapse(document: &str) -> String {
    document.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn directive_variables(document: &str) -> Vec<String> {
    let mut names = Vec::new();
    for directive in ["@skip(if: $", "@include(if: $"] {
        let mut rest = document;
        while let Some(start) = rest.find(directive) {
            rest = &rest[start + directive.len()..];
            let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, document: &str, plan: Plan) -> Self {
        self.plans.insert(collapse(document), plan);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl OperationEngine for StubEngine {
    fn parse(&self, document: &str, operation_name: Option<&str>) -> Result<ParsedOperation, EngineError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let document = collapse(document);
        if !document.contains('{') || document.matches('{').count() != document.matches('}').count() {
            return Err(EngineError::Parse(format!("syntax error in '{document}'")));
        }
        let kind = if document.starts_with("mutation") {
            OperationKind::Mutation
        } else {
            OperationKind::Query
        };
        Ok(ParsedOperation {
            skip_include_variables: directive_variables(&document),
            document: document.into(),
            operation_name: operation_name.map(str::to_string),
            kind,
        })
    }

    fn normalize(&self, parsed: &ParsedOperation, variables: &Value) -> Result<NormalizedOperation, EngineError> {
        self.normalizations.fetch_add(1, Ordering::SeqCst);
        let mut document = parsed.document.to_string();
        for name in &parsed.skip_include_variables {
            let value = variables.get(name).and_then(Value::as_bool).unwrap_or(false);
            document.push_str(&format!(" #{name}={value}"));
        }
        Ok(NormalizedOperation {
            hash: keys::document_hash(&document),
            document: document.into(),
            operation_name: parsed.operation_name.clone(),
            kind: parsed.kind,
        })
    }

    fn validate(&self, operation: &NormalizedOperation) -> ValidationResult {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if operation.document.contains("unknownField") {
            ValidationResult {
                errors: vec!["field: unknownField not defined on type: Employee".into()],
            }
        } else {
            ValidationResult::valid()
        }
    }

    fn plan(&self, operation: &NormalizedOperation) -> Result<Plan, EngineError> {
        self.plans_built.fetch_add(1, Ordering::SeqCst);
        let document = operation.document.split(" #").next().unwrap_or_default();
        Ok(self.plans.get(document).cloned().unwrap_or(Plan {
            kind: operation.kind,
            steps: Vec::new(),
            estimated_cost: 0,
        }))
    }
}

/// Root fetch of `field` from `subgraph` at `url`.
pub fn root_step(id: usize, subgraph: &str, url: &str, field: &str) -> FetchStep {
    FetchStep {
        id,
        subgraph_name: subgraph.into(),
        subgraph_id: format!("{id}"),
        path: ResponsePath::root(),
        fields: vec![FieldShape::nullable(field)],
        depends_on: Vec::new(),
        request: Arc::new(StaticRequest::new(url, format!("{{ {field} {{ id }} }}"))),
    }
}

/// Entity fetch of `fields` for every item of the list at `list_field`.
pub fn entity_step(id: usize, subgraph: &str, url: &str, list_field: &str, fields: &[&str], depends_on: usize) -> FetchStep {
    FetchStep {
        id,
        subgraph_name: subgraph.into(),
        subgraph_id: format!("{id}"),
        path: ResponsePath(vec![PathElement::field(list_field), PathElement::flatten()]),
        fields: fields.iter().map(|f| FieldShape::nullable(*f)).collect(),
        depends_on: vec![depends_on],
        request: Arc::new(EntityRequest {
            url: url.into(),
            query: format!("query($representations: [_Any!]!) {{ _entities(representations: $representations) {{ ... on Employee {{ {} }} }} }}", fields.join(" ")),
            typename: "Employee".into(),
            key_fields: vec!["id".into()],
        }),
    }
}

pub fn plan(steps: Vec<FetchStep>, estimated_cost: u64) -> Plan {
    Plan {
        kind: OperationKind::Query,
        steps,
        estimated_cost,
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

type Handler = Box<dyn Fn(usize, &SubgraphRequest) -> Result<SubgraphResponse, TransportError> + Send + Sync>;

/// In-process transport answering by URL. Handlers get the zero-based call
/// number for their URL.
#[derive(Default)]
pub struct ScriptedTransport {
    handlers: HashMap<String, Handler>,
    delay: Duration,
    calls: Mutex<Vec<SubgraphRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        url: &str,
        handler: impl Fn(usize, &SubgraphRequest) -> Result<SubgraphResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(url.to_string(), Box::new(handler));
        self
    }

    /// Same answer for every call.
    pub fn always(self, url: &str, status: u16, body: &'static str) -> Self {
        self.on(url, move |_, _| Ok(SubgraphResponse::new(status, body)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.url == url).count()
    }

    pub fn requests_to(&self, url: &str) -> Vec<SubgraphRequest> {
        self.calls.lock().iter().filter(|r| r.url == url).cloned().collect()
    }
}

#[async_trait]
impl SubgraphTransport for ScriptedTransport {
    async fn perform(&self, request: SubgraphRequest) -> Result<SubgraphResponse, TransportError> {
        let call = {
            let mut calls = self.calls.lock();
            let call = calls.iter().filter(|r| r.url == request.url).count();
            calls.push(request.clone());
            call
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.handlers.get(&request.url) {
            Some(handler) => handler(call, &request),
            None => Ok(SubgraphResponse::new(404, "")),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BreakerChanged { subgraph_id: String, feature_flag: Option<String>, is_open: bool },
    ShortCircuit { subgraph_id: String, feature_flag: Option<String> },
    Retry { subgraph: String, count: u32, status: u16 },
    CacheLookup { tier: CacheTier, feature_flag: Option<String>, hit: bool },
    WarmupItem { processed: bool },
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn breaker_changes(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::BreakerChanged { .. }))
            .collect()
    }

    pub fn short_circuits(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::ShortCircuit { .. }))
            .count()
    }

    pub fn retries(&self, subgraph: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Retry { subgraph: s, .. } if s == subgraph))
            .count()
    }

    /// `(hits, misses)` for one tier of one scope.
    pub fn cache_counts(&self, tier: CacheTier, feature_flag: Option<&str>) -> (usize, usize) {
        let mut counts = (0, 0);
        for event in self.events() {
            if let Event::CacheLookup { tier: t, feature_flag: f, hit } = event {
                if t == tier && f.as_deref() == feature_flag {
                    if hit {
                        counts.0 += 1;
                    } else {
                        counts.1 += 1;
                    }
                }
            }
        }
        counts
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl ResilienceObserver for RecordingObserver {
    fn breaker_status_changed(&self, key: &BreakerKey, is_open: bool) {
        self.push(Event::BreakerChanged {
            subgraph_id: key.subgraph_id.clone(),
            feature_flag: key.feature_flag.clone(),
            is_open,
        });
    }

    fn breaker_short_circuit(&self, key: &BreakerKey) {
        self.push(Event::ShortCircuit {
            subgraph_id: key.subgraph_id.clone(),
            feature_flag: key.feature_flag.clone(),
        });
    }

    fn retry_attempt(&self, subgraph: &str, attempt: &RetryAttempt) {
        self.push(Event::Retry {
            subgraph: subgraph.to_string(),
            count: attempt.count,
            status: attempt.last_status_code,
        });
    }

    fn cache_lookup(&self, tier: CacheTier, feature_flag: Option<&str>, hit: bool) {
        self.push(Event::CacheLookup {
            tier,
            feature_flag: feature_flag.map(str::to_string),
            hit,
        });
    }

    fn warmup_item(&self, processed: bool) {
        self.push(Event::WarmupItem { processed });
    }
}

// ---------------------------------------------------------------------------
// TCP mock backend
// ---------------------------------------------------------------------------

/// Request as seen by the mock backend.
#[derive(Debug, Clone, Default)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// Reply of the mock backend.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay: Duration,
}

impl MockReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// HTTP/1.1 backend on an ephemeral port. Every connection serves one
/// request and is closed.
pub struct MockBackend {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// `handler` gets the zero-based call number and the request.
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(usize, ReceivedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockReply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let counter = calls.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = handler.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, counter, handler).await;
                });
            }
        });

        Self { addr, calls }
    }

    /// Same reply for every request.
    pub async fn fixed(status: u16, body: &'static str) -> Self {
        Self::start(move |_, _| async move { MockReply::new(status, body) }).await
    }

    pub fn url(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn serve_connection<F, Fut>(
    mut socket: TcpStream,
    counter: Arc<AtomicUsize>,
    handler: Arc<F>,
) -> std::io::Result<()>
where
    F: Fn(usize, ReceivedRequest) -> Fut,
    Fut: Future<Output = MockReply>,
{
    let request = read_request(&mut socket).await?;
    let call = counter.fetch_add(1, Ordering::SeqCst);
    let reply = handler(call, request).await;
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason_phrase(reply.status),
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(&reply.body);
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let mut request = ReceivedRequest {
        method: request_line.next().unwrap_or_default().to_string(),
        path: request_line.next().unwrap_or_default().to_string(),
        ..ReceivedRequest::default()
    };
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            request
                .headers
                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = request
        .headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    request.body = body;
    Ok(request)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/graphql")
}
