//! # graphql-ops
//!
//! Execution core for a GraphQL monitoring and operations tool: scores query
//! cost, protects endpoints from cascading failure, runs queries singly or in
//! batches, and persists results.
//!
//! ## Features
//!
//! - **Complexity scoring**: structural depth/field/list analysis with tunable weights
//! - **Circuit breaking**: per-endpoint CLOSED → OPEN → HALF_OPEN state machine
//! - **Retry backoff**: exponential delays with jitter and per-error eligibility
//! - **Batch execution**: parallel, sequential, priority, and adaptive modes
//! - **Cron scheduling**: single-process scheduler driven by cron expressions
//! - **Result storage**: SQLite or filesystem backends, JSON/MessagePack/legacy
//!   binary serialization, gzip/zlib/lz4 compression, TTL cache, analytics
//!
//! ## Architecture
//!
//! ```text
//! ExecutionManager ─┬─ ComplexityAnalyzer
//!                   ├─ ResilientClient (per endpoint) ─ CircuitBreaker + RetryConfig ─ HTTP
//!                   └─ ResultStorageEngine ─ SQLite | filesystem
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use graphql_ops::{Config, Endpoint, ExecutionManager, Query, ResultStorageEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = ResultStorageEngine::from_config(&config.storage, &config.database).await?;
//!     let manager = ExecutionManager::with_storage(
//!         config.execution.clone(),
//!         config.circuit_breaker.clone(),
//!         Arc::new(storage),
//!     );
//!
//!     let endpoint = Endpoint::new("countries", "https://countries.trevorblades.com/");
//!     let query = Query::new("codes", "query { countries { code } }");
//!     let result = manager.execute_single(&query, &endpoint, None, None).await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

/// Query complexity analysis.
pub mod complexity;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Structured instrumentation events.
pub mod events;
/// Single, batch, and scheduled execution.
pub mod execution;
/// GraphQL wire types and HTTP transport.
pub mod graphql;
/// Endpoint, query, and execution records.
pub mod models;
/// Circuit breaker, retry backoff, and the resilient client.
pub mod resilience;
/// Result storage engine and backends.
pub mod storage;

pub use complexity::{ComplexityAnalyzer, ComplexityLevel, ComplexityMetrics, ComplexityWeights};
pub use config::Config;
pub use error::{AppError, AppResult, ExecutionError, GraphQLError, StorageError};
pub use execution::{
    BatchMode, BatchResult, ExecutionManager, ExecutionRequest, ExecutionStats,
    ScheduledExecution,
};
pub use graphql::{GraphQLRequest, GraphQLResponse};
pub use models::{AuthType, Endpoint, ExecutionResult, ExecutionStatus, HealthCheck, Query};
pub use resilience::{CircuitBreaker, CircuitState, ResilientClient, RetryConfig};
pub use storage::{
    CompressionType, ResultStorageEngine, SearchFilter, SerializationFormat, StorageAnalytics,
    StorageBackendType, StoredResult,
};
