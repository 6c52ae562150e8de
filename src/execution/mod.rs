//! Execution orchestration: single runs, batches, and cron schedules.
//!
//! [`ExecutionManager`] owns one [`ResilientClient`] (and so one circuit
//! breaker) per endpoint id, an optional [`ResultStorageEngine`], and the
//! schedule table. Ordinary failures never surface as `Err`; they come back as
//! failed [`ExecutionResult`]s so batches stay complete.

mod batch;
mod scheduler;

pub use batch::{AdaptiveController, BatchMode, BatchResult, ExecutionRequest};
pub use scheduler::{parse_cron, ScheduledExecution};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::complexity::ComplexityAnalyzer;
use crate::config::{CircuitBreakerConfig, ExecutionConfig};
use crate::error::{ErrorKind, ExecutionError, GraphQLResult, ManagerResult};
use crate::events::{self, Event};
use crate::graphql::GraphQLRequest;
use crate::models::{Endpoint, ExecutionResult, HealthCheck, Query};
use crate::resilience::{CircuitBreakerSummary, CircuitState, ResilientClient, RetryConfig};
use crate::storage::ResultStorageEngine;
use scheduler::ScheduleTable;

/// Scheduler sleep when no schedule is pending.
const IDLE_WAIT: Duration = Duration::from_secs(60);

const HEALTH_CHECK_QUERY: &str = "query { __typename }";

/// Aggregate counters across every execution the manager has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    response_time_ms: AtomicU64,
}

impl StatsCounters {
    fn record(&self, result: &ExecutionResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if result.status == crate::models::ExecutionStatus::Timeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.response_time_ms
            .fetch_add(result.response_time_ms.unwrap_or(0), Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutionStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let response_time_ms = self.response_time_ms.load(Ordering::Relaxed);
        let (success_rate, average_response_time_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                successful as f64 / total as f64,
                response_time_ms as f64 / total as f64,
            )
        };
        ExecutionStats {
            total_executions: total,
            successful,
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            success_rate,
            average_response_time_ms,
        }
    }
}

struct ManagerInner {
    analyzer: StdRwLock<ComplexityAnalyzer>,
    config: ExecutionConfig,
    breaker_config: CircuitBreakerConfig,
    clients: RwLock<HashMap<String, ResilientClient>>,
    storage: Option<Arc<ResultStorageEngine>>,
    schedules: Mutex<ScheduleTable>,
    schedule_changed: Notify,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    stats: StatsCounters,
}

/// Runs queries against endpoints. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ExecutionManager {
    inner: Arc<ManagerInner>,
}

impl ExecutionManager {
    /// Create a manager without result storage.
    pub fn new(config: ExecutionConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self::build(config, breaker_config, None, ComplexityAnalyzer::new())
    }

    /// Create a manager that persists successful results.
    pub fn with_storage(
        config: ExecutionConfig,
        breaker_config: CircuitBreakerConfig,
        storage: Arc<ResultStorageEngine>,
    ) -> Self {
        Self::build(config, breaker_config, Some(storage), ComplexityAnalyzer::new())
    }

    /// Replace the complexity analyzer (custom weights).
    pub fn with_analyzer(self, analyzer: ComplexityAnalyzer) -> Self {
        self.set_analyzer(analyzer);
        self
    }

    /// Replace the complexity analyzer in place. Clients, schedules and stats
    /// are kept, and clones of this manager see the new analyzer.
    pub fn set_analyzer(&self, analyzer: ComplexityAnalyzer) {
        *self
            .inner
            .analyzer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = analyzer;
    }

    fn build(
        config: ExecutionConfig,
        breaker_config: CircuitBreakerConfig,
        storage: Option<Arc<ResultStorageEngine>>,
        analyzer: ComplexityAnalyzer,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                analyzer: StdRwLock::new(analyzer),
                config,
                breaker_config,
                clients: RwLock::new(HashMap::new()),
                storage,
                schedules: Mutex::new(ScheduleTable::default()),
                schedule_changed: Notify::new(),
                scheduler_task: Mutex::new(None),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Register a prebuilt client, replacing any client for the same endpoint id.
    pub async fn register_client(&self, client: ResilientClient) {
        self.inner
            .clients
            .write()
            .await
            .insert(client.endpoint_id().to_string(), client);
    }

    /// Client for an endpoint, created on first use.
    pub async fn client_for(&self, endpoint: &Endpoint) -> GraphQLResult<ResilientClient> {
        if let Some(client) = self.inner.clients.read().await.get(&endpoint.id) {
            return Ok(client.clone());
        }

        let mut clients = self.inner.clients.write().await;
        if let Some(client) = clients.get(&endpoint.id) {
            return Ok(client.clone());
        }
        let client = ResilientClient::new(endpoint, self.inner.breaker_config.clone())?;
        debug!(endpoint_id = %endpoint.id, url = %endpoint.url, "Created endpoint client");
        clients.insert(endpoint.id.clone(), client.clone());
        Ok(client)
    }

    /// Run one query. Failures are reported in the result, never as `Err`.
    pub async fn execute_single(
        &self,
        query: &Query,
        endpoint: &Endpoint,
        variables: Option<serde_json::Map<String, serde_json::Value>>,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::pending(&query.id, &endpoint.id);
        let metrics = self
            .inner
            .analyzer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .analyze(&query.query_text);
        result.complexity_score = Some(metrics.complexity_score);

        events::emit(&Event::ExecutionStarted {
            execution_id: &result.execution_id,
            query_id: &query.id,
            endpoint_id: &endpoint.id,
            complexity_score: metrics.complexity_score,
        });
        result.mark_running();

        let start = Instant::now();
        let outcome = match self.client_for(endpoint).await {
            Ok(client) => {
                client
                    .execute_query_observed(query, variables, timeout, |attempt| {
                        result.mark_retrying(attempt)
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(response) => result.complete(response.data, elapsed_ms),
            Err(e) => result.fail(e.to_string(), elapsed_ms, e.kind() == ErrorKind::Timeout),
        }

        if result.success {
            self.persist(&mut result).await;
        }

        self.inner.stats.record(&result);
        events::emit(&Event::ExecutionFinished {
            execution_id: &result.execution_id,
            endpoint_id: &result.endpoint_id,
            status: result.status,
            response_time_ms: elapsed_ms,
            error: result.error_message.as_deref(),
        });

        result
    }

    /// Store a successful result. Storage failures are noted on the result
    /// without flipping `success`.
    async fn persist(&self, result: &mut ExecutionResult) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let data = result.data.clone().unwrap_or(serde_json::Value::Null);
        match storage
            .store(&result.execution_id, &result.query_id, &data)
            .await
        {
            Ok(key) => result.storage_key = Some(key),
            Err(e) => {
                warn!(
                    execution_id = %result.execution_id,
                    error = %e,
                    "Failed to store execution result"
                );
                result.error_message = Some(format!("Result storage failed: {}", e));
            }
        }
    }

    async fn execute_request(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute_single(
            &request.query,
            &request.endpoint,
            request.variables,
            request.timeout,
        )
        .await
    }

    /// Run a batch under the given mode.
    pub async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
        mode: BatchMode,
    ) -> BatchResult {
        let start = Instant::now();
        let count = requests.len();
        info!(mode = %mode, count, "Starting batch");

        let results: Vec<ExecutionResult> = match mode {
            BatchMode::Parallel => self
                .run_bounded(requests, self.max_concurrent())
                .await
                .into_iter()
                .map(|(_, result)| result)
                .collect(),
            BatchMode::Sequential => {
                let mut results = Vec::with_capacity(count);
                for request in requests {
                    results.push(self.execute_request(request).await);
                }
                results
            }
            BatchMode::Priority => self.run_priority(requests).await,
            BatchMode::Adaptive => self.run_adaptive(requests).await,
        };

        let batch = BatchResult::new(mode, results, start.elapsed());
        info!(
            mode = %mode,
            succeeded = batch.succeeded,
            failed = batch.failed,
            duration_ms = batch.total_duration_ms,
            "Batch finished"
        );
        batch
    }

    fn max_concurrent(&self) -> usize {
        self.inner.config.max_concurrent.max(1)
    }

    /// Run requests concurrently with at most `limit` in flight. Returns
    /// `(input index, result)` in completion order. Permits are handed out
    /// FIFO, so starts follow input order.
    async fn run_bounded(
        &self,
        requests: Vec<ExecutionRequest>,
        limit: usize,
    ) -> Vec<(usize, ExecutionResult)> {
        let semaphore = Semaphore::new(limit.max(1));
        let semaphore = &semaphore;

        let mut in_flight: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| async move {
                let _permit = semaphore.acquire().await;
                (index, self.execute_request(request).await)
            })
            .collect();

        let mut results = Vec::new();
        while let Some(done) = in_flight.next().await {
            results.push(done);
        }
        results
    }

    async fn run_priority(&self, mut requests: Vec<ExecutionRequest>) -> Vec<ExecutionResult> {
        // Stable: equal priorities keep input order.
        requests.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut results = Vec::with_capacity(requests.len());
        let mut remaining = requests.into_iter().peekable();
        while let Some(first) = remaining.next() {
            let priority = first.priority;
            let mut tier = vec![first];
            while let Some(next) = remaining.next_if(|r| r.priority == priority) {
                tier.push(next);
            }

            debug!(priority, size = tier.len(), "Running priority tier");
            let mut tier_results = self.run_bounded(tier, self.max_concurrent()).await;
            tier_results.sort_by_key(|(index, _)| *index);
            results.extend(tier_results.into_iter().map(|(_, result)| result));
        }
        results
    }

    async fn run_adaptive(&self, requests: Vec<ExecutionRequest>) -> Vec<ExecutionResult> {
        let mut controller =
            AdaptiveController::new(self.inner.config.adaptive.clone(), self.max_concurrent());
        let mut results = Vec::with_capacity(requests.len());
        let mut remaining = requests.into_iter();

        loop {
            let window_size = controller.concurrency();
            let window: Vec<_> = remaining.by_ref().take(window_size).collect();
            if window.is_empty() {
                break;
            }

            let window_results = self.run_bounded(window, window_size).await;
            let succeeded = window_results.iter().filter(|(_, r)| r.success).count();
            let failed = window_results.len() - succeeded;
            let next = controller.observe(succeeded, failed);
            debug!(
                window_size,
                succeeded,
                failed,
                next_concurrency = next,
                "Adaptive window finished"
            );

            results.extend(window_results.into_iter().map(|(_, result)| result));
        }
        results
    }

    /// Probe an endpoint with a single `__typename` query, no retries.
    pub async fn check_endpoint_health(&self, endpoint: &Endpoint) -> HealthCheck {
        let checked_at = Utc::now();
        let client = match self.client_for(endpoint).await {
            Ok(client) => client,
            Err(e) => {
                return HealthCheck {
                    endpoint_id: endpoint.id.clone(),
                    checked_at,
                    healthy: false,
                    response_time_ms: None,
                    error_message: Some(e.to_string()),
                    circuit_state: CircuitState::Closed,
                }
            }
        };

        let probe = RetryConfig {
            max_retries: 0,
            ..client.retry_config().clone()
        };
        let start = Instant::now();
        let outcome = client
            .execute_with(&GraphQLRequest::new(HEALTH_CHECK_QUERY), None, &probe)
            .await;
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let health = HealthCheck {
            endpoint_id: endpoint.id.clone(),
            checked_at,
            healthy: outcome.is_ok(),
            response_time_ms: Some(response_time_ms),
            error_message: outcome.err().map(|e| e.to_string()),
            circuit_state: client.circuit_state().await,
        };
        info!(
            endpoint_id = %health.endpoint_id,
            healthy = health.healthy,
            response_time_ms,
            "Endpoint health checked"
        );
        health
    }

    /// Breaker snapshots for every endpoint seen so far.
    pub async fn circuit_summaries(&self) -> Vec<CircuitBreakerSummary> {
        let clients: Vec<ResilientClient> =
            self.inner.clients.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(clients.len());
        for client in clients {
            summaries.push(client.circuit_summary().await);
        }
        summaries.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        summaries
    }

    /// Execution counters since the manager was created.
    pub fn stats(&self) -> ExecutionStats {
        self.inner.stats.snapshot()
    }

    /// Storage engine, when configured.
    pub fn storage(&self) -> Option<&Arc<ResultStorageEngine>> {
        self.inner.storage.as_ref()
    }

    /// Add a cron schedule for a query. Five-field expressions are accepted.
    pub async fn schedule_query(
        &self,
        query: Query,
        endpoint: Endpoint,
        cron_expression: &str,
        variables: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> ManagerResult<ScheduledExecution> {
        let scheduled = self.inner.schedules.lock().await.add(
            query,
            endpoint,
            cron_expression,
            variables,
            Utc::now(),
        )?;
        self.inner.schedule_changed.notify_one();
        info!(
            schedule_id = %scheduled.id,
            query_id = %scheduled.query.id,
            cron = %scheduled.cron_expression,
            next_run = ?scheduled.next_run,
            "Query scheduled"
        );
        Ok(scheduled)
    }

    /// Remove a schedule. An in-flight firing finishes but is not rescheduled.
    pub async fn unschedule_query(&self, schedule_id: &str) -> bool {
        let removed = self.inner.schedules.lock().await.remove(schedule_id);
        if removed {
            self.inner.schedule_changed.notify_one();
            info!(schedule_id = %schedule_id, "Query unscheduled");
        }
        removed
    }

    /// Look up one schedule.
    pub async fn get_schedule(&self, schedule_id: &str) -> ManagerResult<ScheduledExecution> {
        self.inner
            .schedules
            .lock()
            .await
            .get(schedule_id)
            .ok_or_else(|| ExecutionError::ScheduleNotFound {
                schedule_id: schedule_id.to_string(),
            })
    }

    /// All schedules, soonest first.
    pub async fn list_schedules(&self) -> Vec<ScheduledExecution> {
        self.inner.schedules.lock().await.list()
    }

    /// Spawn the scheduler loop. Fails if it is already running.
    pub async fn start_scheduler(&self) -> ManagerResult<()> {
        let mut task = self.inner.scheduler_task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(ExecutionError::SchedulerRunning);
        }

        let manager = self.clone();
        *task = Some(tokio::spawn(async move { manager.scheduler_loop().await }));
        info!("Scheduler started");
        Ok(())
    }

    /// Stop the scheduler loop. Executions already fired keep running.
    /// Returns whether a loop was running.
    pub async fn stop_scheduler(&self) -> bool {
        let Some(handle) = self.inner.scheduler_task.lock().await.take() else {
            return false;
        };
        handle.abort();
        let _ = handle.await;
        info!("Scheduler stopped");
        true
    }

    /// Whether the scheduler loop is running.
    pub async fn is_scheduler_running(&self) -> bool {
        self.inner
            .scheduler_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn scheduler_loop(self) {
        loop {
            let due = self.inner.schedules.lock().await.take_due(Utc::now());
            for scheduled in due {
                debug!(
                    schedule_id = %scheduled.id,
                    run_count = scheduled.run_count,
                    "Firing scheduled query"
                );
                let manager = self.clone();
                tokio::spawn(async move {
                    manager
                        .execute_single(
                            &scheduled.query,
                            &scheduled.endpoint,
                            scheduled.variables.clone(),
                            None,
                        )
                        .await;
                });
            }

            let wait = match self.inner.schedules.lock().await.next_wake() {
                Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                None => IDLE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.inner.schedule_changed.notified() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdaptiveConfig;
    use crate::error::GraphQLError;
    use crate::graphql::{GraphQLResponse, GraphQLTransport};
    use crate::models::ExecutionStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Succeeds unless the query text contains "fail"; tracks peak concurrency.
    struct StubTransport {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        delay: Duration,
        order: std::sync::Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                delay,
                order: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GraphQLTransport for StubTransport {
        async fn send(&self, request: &GraphQLRequest) -> GraphQLResult<GraphQLResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(request.query.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.query.contains("fail") {
                Err(GraphQLError::Client {
                    status: 400,
                    message: "bad query".into(),
                })
            } else {
                Ok(GraphQLResponse {
                    data: Some(json!({"ok": request.query})),
                    ..Default::default()
                })
            }
        }

        fn url(&self) -> &str {
            "stub://"
        }
    }

    fn exec_config(max_concurrent: usize) -> ExecutionConfig {
        ExecutionConfig {
            max_concurrent,
            adaptive: AdaptiveConfig::default(),
        }
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        }
    }

    async fn manager_with_stub(
        max_concurrent: usize,
        delay: Duration,
    ) -> (ExecutionManager, Endpoint, Arc<StubTransport>) {
        let manager = ExecutionManager::new(exec_config(max_concurrent), breaker_config());
        let endpoint = Endpoint::new("stub", "http://stub.invalid/graphql");
        let transport = StubTransport::new(delay);
        let client = ResilientClient::with_transport(&endpoint, transport.clone(), breaker_config())
            .with_retry_config(RetryConfig::default().without_jitter());
        manager.register_client(client).await;
        (manager, endpoint, transport)
    }

    fn request(endpoint: &Endpoint, text: &str) -> ExecutionRequest {
        ExecutionRequest::new(Query::new(text, text).with_id(text), endpoint.clone())
    }

    #[tokio::test]
    async fn test_execute_single_success() {
        let (manager, endpoint, _) = manager_with_stub(4, Duration::ZERO).await;
        let query = Query::new("q", "query { user { id name } }");

        let result = manager.execute_single(&query, &endpoint, None, None).await;
        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.complexity_score.unwrap() >= 1);
        assert!(result.storage_key.is_none());
        assert_eq!(manager.stats().successful, 1);
    }

    #[tokio::test]
    async fn test_execute_single_failure_is_a_result() {
        let (manager, endpoint, transport) = manager_with_stub(4, Duration::ZERO).await;
        let query = Query::new("q", "query { fail }");

        let result = manager.execute_single(&query, &endpoint, None, None).await;
        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error_message.unwrap().contains("400"));
        // Client errors are not retried.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_status() {
        let (manager, endpoint, _) = manager_with_stub(4, Duration::from_millis(200)).await;
        let client = manager
            .client_for(&endpoint)
            .await
            .unwrap()
            .with_retry_config(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            });
        manager.register_client(client).await;

        let query = Query::new("q", "query { slow }");
        let result = manager
            .execute_single(&query, &endpoint, None, Some(Duration::from_millis(10)))
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(manager.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_parallel_respects_max_concurrent() {
        let (manager, endpoint, transport) = manager_with_stub(3, Duration::from_millis(20)).await;
        let requests: Vec<_> = (0..10)
            .map(|i| request(&endpoint, &format!("query {{ a{} }}", i)))
            .collect();

        let batch = manager.execute_batch(requests, BatchMode::Parallel).await;
        assert_eq!(batch.total(), 10);
        assert_eq!(batch.succeeded, 10);
        assert!(transport.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_sequential_keeps_order_and_continues_after_failure() {
        let (manager, endpoint, transport) = manager_with_stub(3, Duration::ZERO).await;
        let requests = vec![
            request(&endpoint, "query { first }"),
            request(&endpoint, "query { fail }"),
            request(&endpoint, "query { third }"),
        ];

        let batch = manager.execute_batch(requests, BatchMode::Sequential).await;
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        let ids: Vec<_> = batch.results.iter().map(|r| r.query_id.as_str()).collect();
        assert_eq!(ids, vec!["query { first }", "query { fail }", "query { third }"]);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let (manager, endpoint, transport) = manager_with_stub(1, Duration::ZERO).await;
        let requests = vec![
            request(&endpoint, "query { low }").with_priority(1),
            request(&endpoint, "query { high_a }").with_priority(5),
            request(&endpoint, "query { mid }").with_priority(3),
            request(&endpoint, "query { high_b }").with_priority(5),
        ];

        let batch = manager.execute_batch(requests, BatchMode::Priority).await;
        let expected = vec![
            "query { high_a }",
            "query { high_b }",
            "query { mid }",
            "query { low }",
        ];
        let ids: Vec<_> = batch.results.iter().map(|r| r.query_id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(*transport.order.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_adaptive_completes_every_request() {
        let (manager, endpoint, transport) = manager_with_stub(4, Duration::from_millis(5)).await;
        let requests: Vec<_> = (0..12)
            .map(|i| {
                let text = if i % 4 == 0 {
                    format!("query {{ fail{} }}", i)
                } else {
                    format!("query {{ ok{} }}", i)
                };
                request(&endpoint, &text)
            })
            .collect();

        let batch = manager.execute_batch(requests, BatchMode::Adaptive).await;
        assert_eq!(batch.total(), 12);
        assert_eq!(batch.failed, 3);
        assert!(transport.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (manager, _, _) = manager_with_stub(2, Duration::ZERO).await;
        for mode in [
            BatchMode::Parallel,
            BatchMode::Sequential,
            BatchMode::Priority,
            BatchMode::Adaptive,
        ] {
            let batch = manager.execute_batch(Vec::new(), mode).await;
            assert_eq!(batch.total(), 0);
        }
    }

    #[tokio::test]
    async fn test_clients_are_reused_per_endpoint() {
        let manager = ExecutionManager::new(exec_config(2), breaker_config());
        let endpoint = Endpoint::new("e", "http://localhost:9/graphql");
        manager.client_for(&endpoint).await.unwrap();
        manager.client_for(&endpoint).await.unwrap();
        assert_eq!(manager.circuit_summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (manager, endpoint, transport) = manager_with_stub(2, Duration::ZERO).await;
        let health = manager.check_endpoint_health(&endpoint).await;
        assert!(health.healthy);
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(
            transport.order.lock().unwrap().as_slice(),
            [HEALTH_CHECK_QUERY.to_string()]
        );
    }

    #[tokio::test]
    async fn test_schedule_lifecycle() {
        let manager = ExecutionManager::new(exec_config(2), breaker_config());
        let endpoint = Endpoint::new("e", "http://localhost:9/graphql");
        let scheduled = manager
            .schedule_query(Query::new("q", "query { a }"), endpoint, "0 * * * *", None)
            .await
            .unwrap();
        assert!(scheduled.next_run.is_some());
        assert_eq!(manager.list_schedules().await.len(), 1);
        assert!(manager.get_schedule(&scheduled.id).await.is_ok());

        assert!(manager.unschedule_query(&scheduled.id).await);
        assert!(!manager.unschedule_query(&scheduled.id).await);
        assert!(matches!(
            manager.get_schedule(&scheduled.id).await,
            Err(ExecutionError::ScheduleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_cron() {
        let manager = ExecutionManager::new(exec_config(2), breaker_config());
        let endpoint = Endpoint::new("e", "http://localhost:9/graphql");
        let err = manager
            .schedule_query(Query::new("q", "query { a }"), endpoint, "every tuesday", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidCron { .. }));
    }

    #[tokio::test]
    async fn test_scheduler_fires_due_entries() {
        let (manager, endpoint, transport) = manager_with_stub(2, Duration::ZERO).await;
        manager
            .schedule_query(Query::new("q", "query { tick }"), endpoint, "* * * * * *", None)
            .await
            .unwrap();

        manager.start_scheduler().await.unwrap();
        assert!(matches!(
            manager.start_scheduler().await,
            Err(ExecutionError::SchedulerRunning)
        ));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(manager.stop_scheduler().await);
        assert!(!manager.is_scheduler_running().await);

        assert!(transport.calls.load(Ordering::SeqCst) >= 1);
        let schedules = manager.list_schedules().await;
        assert!(schedules[0].run_count >= 1);
        assert!(schedules[0].last_run.is_some());
    }

    #[tokio::test]
    async fn test_unscheduling_during_a_firing_is_final() {
        let (manager, endpoint, transport) =
            manager_with_stub(2, Duration::from_millis(1500)).await;
        let scheduled = manager
            .schedule_query(Query::new("q", "query { slow }"), endpoint, "* * * * * *", None)
            .await
            .unwrap();
        manager.start_scheduler().await.unwrap();

        // Wait for the first firing to reach the transport.
        for _ in 0..150 {
            if transport.in_flight.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 1);

        assert!(manager.unschedule_query(&scheduled.id).await);
        assert!(manager.list_schedules().await.is_empty());

        // Outlive the in-flight firing plus a couple of cron ticks.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().total_executions, 1);
        assert!(manager.list_schedules().await.is_empty());
        assert!(matches!(
            manager.get_schedule(&scheduled.id).await,
            Err(ExecutionError::ScheduleNotFound { .. })
        ));
        assert!(manager.stop_scheduler().await);
    }

    /// Fails with 503 a fixed number of times, then succeeds.
    struct FlakyTransport {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl GraphQLTransport for FlakyTransport {
        async fn send(&self, _request: &GraphQLRequest) -> GraphQLResult<GraphQLResponse> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(GraphQLError::Server {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(GraphQLResponse {
                data: Some(json!({"ok": true})),
                ..Default::default()
            })
        }

        fn url(&self) -> &str {
            "flaky://"
        }
    }

    #[tokio::test]
    async fn test_retries_are_counted_on_result() {
        let manager = ExecutionManager::new(exec_config(2), breaker_config());
        let endpoint = Endpoint::new("flaky", "http://flaky.invalid/graphql");
        let transport = Arc::new(FlakyTransport {
            failures_left: AtomicUsize::new(2),
        });
        let client = ResilientClient::with_transport(&endpoint, transport, breaker_config())
            .with_retry_config(
                RetryConfig {
                    max_retries: 3,
                    base_delay: Duration::from_millis(1),
                    ..RetryConfig::default()
                }
                .without_jitter(),
            );
        manager.register_client(client).await;

        let result = manager
            .execute_single(&Query::new("q", "query { a }"), &endpoint, None, None)
            .await;
        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.retry_count, 2);

        let clean = manager
            .execute_single(&Query::new("q", "query { a }"), &endpoint, None, None)
            .await;
        assert_eq!(clean.retry_count, 0);
    }

    #[tokio::test]
    async fn test_replacing_analyzer_keeps_manager_state() {
        use crate::complexity::ComplexityWeights;

        let (manager, endpoint, transport) = manager_with_stub(2, Duration::ZERO).await;
        let query = Query::new("q", "query { user { id } }");
        let before = manager.execute_single(&query, &endpoint, None, None).await;
        manager
            .schedule_query(query.clone(), endpoint.clone(), "0 * * * *", None)
            .await
            .unwrap();

        let manager = manager.with_analyzer(ComplexityAnalyzer::with_weights(ComplexityWeights {
            field_weight: 100,
            ..ComplexityWeights::default()
        }));
        let after = manager.execute_single(&query, &endpoint, None, None).await;

        assert!(after.success);
        assert!(after.complexity_score.unwrap() >= 100);
        assert!(after.complexity_score > before.complexity_score);
        // The stub client registered before the swap is still the one used.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.list_schedules().await.len(), 1);
        assert_eq!(manager.stats().total_executions, 2);
    }
}
