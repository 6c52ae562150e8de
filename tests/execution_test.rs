//! End-to-end execution tests
//!
//! Runs the execution manager against wiremock endpoints with result storage
//! attached, covering persistence, batch completeness, and per-endpoint
//! circuit isolation.

use std::sync::Arc;

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use graphql_ops::config::{CircuitBreakerConfig, ExecutionConfig, StorageConfig};
use graphql_ops::storage::SqliteBackend;
use graphql_ops::{
    BatchMode, CircuitState, Endpoint, ExecutionManager, ExecutionRequest, ExecutionStatus, Query,
    ResultStorageEngine, SearchFilter,
};

async fn create_storage() -> Arc<ResultStorageEngine> {
    let backend = Arc::new(SqliteBackend::new_in_memory().await.unwrap());
    Arc::new(ResultStorageEngine::new(backend, &StorageConfig::default()))
}

fn create_manager(storage: Arc<ResultStorageEngine>, failure_threshold: u32) -> ExecutionManager {
    ExecutionManager::with_storage(
        ExecutionConfig {
            max_concurrent: 4,
            ..ExecutionConfig::default()
        },
        CircuitBreakerConfig {
            failure_threshold,
            ..CircuitBreakerConfig::default()
        },
        storage,
    )
}

/// Endpoint with retries disabled so failures surface immediately
fn create_endpoint(server: &MockServer, id: &str) -> Endpoint {
    Endpoint::new(id, format!("{}/graphql", server.uri()))
        .with_id(id)
        .with_timeout_seconds(5)
        .with_retries(0, 0.0)
}

#[tokio::test]
async fn test_successful_execution_is_stored() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"user": {"id": "1", "name": "Ada"}}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = create_storage().await;
    let manager = create_manager(storage.clone(), 5);
    let endpoint = create_endpoint(&mock_server, "users-api");
    let query = Query::new("user", "query { user { id name } }").with_id("q-user");

    let result = manager.execute_single(&query, &endpoint, None, None).await;

    assert!(result.success);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(result.error_message.is_none());
    let key = result.storage_key.clone().expect("result should be stored");
    assert_eq!(
        storage.retrieve(&key).await.unwrap(),
        json!({"user": {"id": "1", "name": "Ada"}})
    );

    let stored = storage
        .search_results(&SearchFilter::for_query("q-user"))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].execution_id, result.execution_id);
}

#[tokio::test]
async fn test_failed_execution_is_not_stored() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&mock_server)
        .await;

    let storage = create_storage().await;
    let manager = create_manager(storage.clone(), 5);
    let endpoint = create_endpoint(&mock_server, "broken-api");
    let query = Query::new("q", "query { a }");

    let result = manager.execute_single(&query, &endpoint, None, None).await;

    assert!(!result.success);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.storage_key.is_none());
    assert!(result.error_message.unwrap().contains("400"));
    assert_eq!(
        storage.get_storage_analytics().await.unwrap().total_results,
        0
    );
}

#[tokio::test]
async fn test_parallel_batch_is_complete() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"query": "query { fail }"})))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .mount(&mock_server)
        .await;

    let storage = create_storage().await;
    let manager = create_manager(storage.clone(), 100);
    let endpoint = create_endpoint(&mock_server, "batch-api");

    let requests: Vec<_> = (0..9)
        .map(|i| {
            let text = if i % 3 == 0 { "query { fail }" } else { "query { ok }" };
            ExecutionRequest::new(Query::new(format!("q{}", i), text), endpoint.clone())
        })
        .collect();

    let batch = manager.execute_batch(requests, BatchMode::Parallel).await;

    assert_eq!(batch.total(), 9);
    assert_eq!(batch.succeeded, 6);
    assert_eq!(batch.failed, 3);
    assert_eq!(
        storage.get_storage_analytics().await.unwrap().total_results,
        6
    );

    let stats = manager.stats();
    assert_eq!(stats.total_executions, 9);
    assert_eq!(stats.successful, 6);
}

#[tokio::test]
async fn test_breakers_are_isolated_per_endpoint() {
    let healthy_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .mount(&healthy_server)
        .await;

    let failing_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&failing_server)
        .await;

    let manager = create_manager(create_storage().await, 2);
    let healthy = create_endpoint(&healthy_server, "healthy");
    let failing = create_endpoint(&failing_server, "failing");
    let query = Query::new("q", "query { ok }");

    let requests = vec![
        ExecutionRequest::new(query.clone(), failing.clone()),
        ExecutionRequest::new(query.clone(), failing.clone()),
        ExecutionRequest::new(query.clone(), failing.clone()),
        ExecutionRequest::new(query.clone(), healthy.clone()),
    ];
    let batch = manager.execute_batch(requests, BatchMode::Sequential).await;

    assert_eq!(batch.failed, 3);
    assert!(batch.results[2]
        .error_message
        .as_deref()
        .unwrap()
        .contains("circuit breaker open"));
    assert!(batch.results[3].success);

    let summaries = manager.circuit_summaries().await;
    let state_of = |id: &str| {
        summaries
            .iter()
            .find(|s| s.endpoint_id == id)
            .map(|s| s.state)
    };
    assert_eq!(state_of("failing"), Some(CircuitState::Open));
    assert_eq!(state_of("healthy"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_endpoint_health_check() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"query": "query { __typename }"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"__typename": "Query"}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = create_manager(create_storage().await, 5);
    let endpoint = create_endpoint(&mock_server, "probe");

    let health = manager.check_endpoint_health(&endpoint).await;
    assert!(health.healthy);
    assert!(health.error_message.is_none());
    assert!(health.response_time_ms.is_some());
    assert_eq!(health.circuit_state, CircuitState::Closed);
}

#[tokio::test]
async fn test_unreachable_endpoint_health_check() {
    // Nothing listens on port 9 locally.
    let endpoint = Endpoint::new("down", "http://127.0.0.1:9/graphql")
        .with_id("down")
        .with_timeout_seconds(2);
    let manager = create_manager(create_storage().await, 5);

    let health = manager.check_endpoint_health(&endpoint).await;
    assert!(!health.healthy);
    assert!(health.error_message.is_some());
}
