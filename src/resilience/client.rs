use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
use super::retry::RetryConfig;
use crate::config::CircuitBreakerConfig;
use crate::error::{GraphQLError, GraphQLResult};
use crate::events::{self, Event};
use crate::graphql::{GraphQLRequest, GraphQLResponse, GraphQLTransport, HttpTransport};
use crate::models::{Endpoint, Query};

/// GraphQL client for one endpoint with circuit breaking and retry backoff.
///
/// Cloning is cheap and clones share the same breaker.
#[derive(Clone)]
pub struct ResilientClient {
    endpoint_id: String,
    transport: Arc<dyn GraphQLTransport>,
    breaker: Arc<RwLock<CircuitBreaker>>,
    retry: RetryConfig,
    default_timeout: Duration,
}

impl ResilientClient {
    /// Create a client over an HTTP transport built from the endpoint record.
    pub fn new(endpoint: &Endpoint, breaker_config: CircuitBreakerConfig) -> GraphQLResult<Self> {
        let transport = HttpTransport::new(endpoint)?;
        Ok(Self::with_transport(endpoint, Arc::new(transport), breaker_config))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(
        endpoint: &Endpoint,
        transport: Arc<dyn GraphQLTransport>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            endpoint_id: endpoint.id.clone(),
            transport,
            breaker: Arc::new(RwLock::new(CircuitBreaker::new(
                endpoint.id.clone(),
                breaker_config,
            ))),
            retry: RetryConfig::from_endpoint(endpoint),
            default_timeout: Duration::from_secs(endpoint.timeout_seconds.max(1)),
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Execute a request, retrying eligible failures.
    ///
    /// `timeout` bounds each attempt, not the whole retry sequence.
    pub async fn execute(
        &self,
        request: &GraphQLRequest,
        timeout: Option<Duration>,
    ) -> GraphQLResult<GraphQLResponse> {
        self.execute_with(request, timeout, &self.retry).await
    }

    /// Execute a stored query with optional variable overrides.
    pub async fn execute_query(
        &self,
        query: &Query,
        variables: Option<serde_json::Map<String, serde_json::Value>>,
        timeout: Option<Duration>,
    ) -> GraphQLResult<GraphQLResponse> {
        let request = request_for(query, variables);
        self.execute(&request, timeout).await
    }

    /// Like [`execute_query`](Self::execute_query), calling `on_retry` with the
    /// upcoming attempt number before each retry.
    pub async fn execute_query_observed<F>(
        &self,
        query: &Query,
        variables: Option<serde_json::Map<String, serde_json::Value>>,
        timeout: Option<Duration>,
        on_retry: F,
    ) -> GraphQLResult<GraphQLResponse>
    where
        F: FnMut(u32) + Send,
    {
        let request = request_for(query, variables);
        self.run_attempts(&request, timeout, &self.retry, on_retry).await
    }

    /// Execute with an explicit retry configuration for this call only.
    pub async fn execute_with(
        &self,
        request: &GraphQLRequest,
        timeout: Option<Duration>,
        retry: &RetryConfig,
    ) -> GraphQLResult<GraphQLResponse> {
        self.run_attempts(request, timeout, retry, |_| {}).await
    }

    async fn run_attempts<F>(
        &self,
        request: &GraphQLRequest,
        timeout: Option<Duration>,
        retry: &RetryConfig,
        mut on_retry: F,
    ) -> GraphQLResult<GraphQLResponse>
    where
        F: FnMut(u32) + Send,
    {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.write().await.is_request_allowed() {
                debug!(endpoint_id = %self.endpoint_id, "Request rejected by open circuit");
                return Err(GraphQLError::CircuitBreakerOpen {
                    endpoint: self.endpoint_id.clone(),
                });
            }

            let start = Instant::now();
            let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(GraphQLError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            let latency = start.elapsed();

            match outcome {
                Ok(response) => {
                    self.breaker.write().await.record_success();
                    info!(
                        endpoint_id = %self.endpoint_id,
                        attempt,
                        latency_ms = latency.as_millis(),
                        "GraphQL request succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        endpoint_id = %self.endpoint_id,
                        error = %e,
                        attempt,
                        latency_ms = latency.as_millis(),
                        "GraphQL request failed"
                    );

                    if !retry.is_retryable(&e) || attempt >= retry.max_retries {
                        self.breaker.write().await.record_failure();
                        return Err(e);
                    }

                    let delay = retry.delay_for_attempt(attempt);
                    let message = e.to_string();
                    events::emit(&Event::RetryAttempt {
                        endpoint_id: &self.endpoint_id,
                        attempt: attempt + 1,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error: &message,
                    });
                    on_retry(attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Endpoint this client talks to.
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// URL of the underlying transport.
    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Retry configuration used by `execute`.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Current breaker state.
    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.read().await.state()
    }

    /// Snapshot of the breaker for display and health reporting.
    pub async fn circuit_summary(&self) -> CircuitBreakerSummary {
        self.breaker.read().await.summary()
    }

    /// Force the breaker closed.
    pub async fn reset_circuit(&self) {
        self.breaker.write().await.reset();
    }
}

/// Build the wire request for a stored query, letting `variables` override its defaults.
fn request_for(
    query: &Query,
    variables: Option<serde_json::Map<String, serde_json::Value>>,
) -> GraphQLRequest {
    let mut merged = query.variables.clone();
    if let Some(overrides) = variables {
        merged.extend(overrides);
    }
    let mut request = GraphQLRequest::new(query.query_text.clone()).with_variables(merged);
    if let Some(op) = &query.operation_name {
        request = request.with_operation_name(op.clone());
    }
    request
}
