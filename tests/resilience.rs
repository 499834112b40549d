//! Retry and circuit breaker behavior through the gateway.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use subgraph_resilience::config::schema::{CircuitBreakerConfig, RetryConfig, SubgraphTrafficRule};
use subgraph_resilience::fetch::types::TransportErrorKind;
use subgraph_resilience::fetch::{OperationKind, SubgraphResponse, TransportError};
use subgraph_resilience::pipeline::{ClientInfo, GraphQLRequest, InMemoryPersistedStore};
use subgraph_resilience::{Gateway, GatewayConfig, GatewayParts, RequestContext};

mod common;
use common::{entity_step, plan, root_step, Event, RecordingObserver, ScriptedTransport, StubEngine};

const EMPLOYEES: &str = "http://employees/graphql";
const PRODUCTS: &str = "http://products/graphql";
const QUERY: &str = "{ employees { id products } }";

fn engine() -> StubEngine {
    StubEngine::new().with_plan(
        QUERY,
        plan(
            vec![
                root_step(0, "employees", EMPLOYEES, "employees"),
                entity_step(1, "products", PRODUCTS, "employees", &["products"], 0),
            ],
            2,
        ),
    )
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        interval: Duration::from_millis(10),
        max_duration: Duration::from_secs(10),
        ..RetryConfig::default()
    }
}

fn gateway(config: GatewayConfig, transport: Arc<ScriptedTransport>, observer: Arc<RecordingObserver>) -> Gateway {
    Gateway::new(
        config,
        GatewayParts {
            engine: Arc::new(engine()),
            persisted_store: Arc::new(InMemoryPersistedStore::new()),
            transport,
            observer,
        },
    )
    .unwrap()
}

fn employees_ok() -> Result<SubgraphResponse, TransportError> {
    Ok(SubgraphResponse::new(200, r#"{"data":{"employees":[{"id":1},{"id":2}]}}"#))
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_per_subgraph() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(EMPLOYEES, |_, _| employees_ok())
            .always(PRODUCTS, 503, ""),
    );
    let observer = RecordingObserver::new();

    let mut config = GatewayConfig::default();
    config.traffic_shaping.all.retry = fast_retry(3);
    let gw = gateway(config, transport.clone(), observer.clone());

    let response = gw.execute(&GraphQLRequest::query(QUERY), RequestContext::default()).await;
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls_to(EMPLOYEES), 1);
    assert_eq!(transport.calls_to(PRODUCTS), 4);
    assert_eq!(observer.retries("products"), 3);

    // Products gets its own rule without retries; employees keeps `all`.
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(EMPLOYEES, |_, _| employees_ok())
            .always(PRODUCTS, 503, ""),
    );
    let mut config = GatewayConfig::default();
    config.traffic_shaping.all.retry = fast_retry(3);
    config.traffic_shaping.subgraphs.insert(
        "products".into(),
        SubgraphTrafficRule {
            retry: RetryConfig {
                enabled: false,
                ..RetryConfig::default()
            },
            ..SubgraphTrafficRule::default()
        },
    );
    let gw = gateway(config, transport.clone(), RecordingObserver::new());
    gw.execute(&GraphQLRequest::query(QUERY), RequestContext::default()).await;
    assert_eq!(transport.calls_to(PRODUCTS), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_transient_failures() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(EMPLOYEES, |call, _| {
                if call < 2 {
                    Err(TransportError::new(TransportErrorKind::ConnectionRefused, "connection refused"))
                } else {
                    employees_ok()
                }
            })
            .always(PRODUCTS, 200, r#"{"data":{"_entities":[{"products":["a"]},{"products":[]}]}}"#),
    );
    let mut config = GatewayConfig::default();
    config.traffic_shaping.all.retry = fast_retry(5);
    let gw = gateway(config, transport.clone(), RecordingObserver::new());

    let response = gw.execute(&GraphQLRequest::query(QUERY), RequestContext::default()).await;
    assert_eq!(
        response.json(),
        json!({"data": {"employees": [{"id": 1, "products": ["a"]}, {"id": 2, "products": []}]}})
    );
    assert_eq!(transport.calls_to(EMPLOYEES), 3);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_are_not_retried() {
    let mutation = "mutation { updateEmployee { id } }";
    let mut mutation_plan = plan(vec![root_step(0, "employees", EMPLOYEES, "updateEmployee")], 1);
    mutation_plan.kind = OperationKind::Mutation;

    let transport = Arc::new(ScriptedTransport::new().always(EMPLOYEES, 503, ""));
    let mut config = GatewayConfig::default();
    config.traffic_shaping.all.retry = fast_retry(5);
    let gw = Gateway::new(
        config,
        GatewayParts {
            engine: Arc::new(StubEngine::new().with_plan(mutation, mutation_plan)),
            persisted_store: Arc::new(InMemoryPersistedStore::new()),
            transport: transport.clone(),
            observer: RecordingObserver::new(),
        },
    )
    .unwrap();

    gw.execute(&GraphQLRequest::query(mutation), RequestContext::default()).await;
    assert_eq!(transport.calls_to(EMPLOYEES), 1);
}

fn breaker_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.feature_flags = vec!["myff".into()];
    config.traffic_shaping.all.retry.enabled = false;
    config.traffic_shaping.all.circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        error_threshold_percentage: 50,
        request_threshold: 2,
        sleep_window: Duration::from_secs(5),
        half_open_attempts: 1,
        rolling_duration: Duration::from_secs(10),
        num_buckets: 10,
    };
    config
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_short_circuits_and_recovers() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(EMPLOYEES, |call, _| {
                if call < 2 {
                    Ok(SubgraphResponse::new(500, ""))
                } else {
                    employees_ok()
                }
            })
            .always(PRODUCTS, 200, r#"{"data":{"_entities":[{"products":[]},{"products":[]}]}}"#),
    );
    let observer = RecordingObserver::new();
    let gw = gateway(breaker_config(), transport.clone(), observer.clone());
    let request = GraphQLRequest::query(QUERY);

    gw.execute(&request, RequestContext::default()).await;
    gw.execute(&request, RequestContext::default()).await;
    assert_eq!(
        observer.breaker_changes(),
        vec![Event::BreakerChanged {
            subgraph_id: "0".into(),
            feature_flag: None,
            is_open: true
        }]
    );

    // Open: the transport is not called and the client sees the wrapper error.
    let denied = gw.execute(&request, RequestContext::default()).await;
    assert_eq!(transport.calls_to(EMPLOYEES), 2);
    assert_eq!(observer.short_circuits(), 1);
    assert_eq!(
        denied.json(),
        json!({
            "errors": [{
                "message": "Failed to fetch from Subgraph 'employees'.",
                "extensions": {"serviceName": "employees"}
            }],
            "data": {"employees": null}
        })
    );

    // The feature-flag scope has its own breaker.
    gw.execute(&request, RequestContext::default().with_feature_flag("myff")).await;
    assert_eq!(transport.calls_to(EMPLOYEES), 3);

    // After the sleep window one trial goes through and closes the breaker.
    tokio::time::advance(Duration::from_secs(5)).await;
    let recovered = gw.execute(&request, RequestContext::default()).await;
    assert_eq!(recovered.json()["data"]["employees"], json!([{"id": 1, "products": []}, {"id": 2, "products": []}]));
    assert_eq!(observer.breaker_changes().len(), 2);
    assert_eq!(
        observer.breaker_changes()[1],
        Event::BreakerChanged {
            subgraph_id: "0".into(),
            feature_flag: None,
            is_open: false
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_dependency_skips_entity_fetch() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .always(EMPLOYEES, 500, "")
            .always(PRODUCTS, 200, r#"{"data":{"_entities":[]}}"#),
    );
    let mut config = GatewayConfig::default();
    config.traffic_shaping.all.retry.enabled = false;
    let gw = gateway(config, transport.clone(), RecordingObserver::new());

    let response = gw
        .execute(&GraphQLRequest::query(QUERY), RequestContext::new(ClientInfo::default()))
        .await;
    assert_eq!(transport.calls_to(PRODUCTS), 0);
    let body = response.json();
    assert_eq!(body["data"], json!({"employees": null}));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["errors"][0]["message"],
        "Failed to fetch from Subgraph 'employees', Reason: empty response."
    );
}

#[tokio::test(start_paused = true)]
async fn test_entity_request_carries_representations() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .on(EMPLOYEES, |_, _| employees_ok())
            .always(PRODUCTS, 200, r#"{"data":{"_entities":[{"products":[]},{"products":[]}]}}"#),
    );
    let gw = gateway(GatewayConfig::default(), transport.clone(), RecordingObserver::new());
    gw.execute(&GraphQLRequest::query(QUERY), RequestContext::default()).await;

    let requests = transport.requests_to(PRODUCTS);
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].body["variables"]["representations"],
        json!([{"__typename": "Employee", "id": 1}, {"__typename": "Employee", "id": 2}])
    );
}
