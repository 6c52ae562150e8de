use thiserror::Error;

use crate::graphql::GraphQLErrorEntry;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("GraphQL error: {0}")]
    GraphQL(#[from] GraphQLError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Broad classification of a GraphQL failure, used to decide retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The attempt exceeded its timeout.
    Timeout,
    /// Connection refused, DNS failure, reset.
    Network,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 401 or rejected credentials.
    Authentication,
    /// Any other HTTP 4xx or protocol failure.
    Client,
    /// HTTP success but the response carried GraphQL `errors`.
    Execution,
    /// Rejected by the circuit breaker without reaching the transport.
    CircuitOpen,
}

/// GraphQL transport and resilience errors
#[derive(Debug, Error)]
pub enum GraphQLError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Client error: {status} - {message}")]
    Client { status: u16, message: String },

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("GraphQL execution failed: {}", summarize_errors(.errors))]
    Execution { errors: Vec<GraphQLErrorEntry> },

    #[error("Service unavailable: circuit breaker open for endpoint {endpoint}")]
    CircuitBreakerOpen { endpoint: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GraphQLError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphQLError::Network { .. } => ErrorKind::Network,
            GraphQLError::Timeout { .. } => ErrorKind::Timeout,
            GraphQLError::Authentication { .. } => ErrorKind::Authentication,
            GraphQLError::Client { .. }
            | GraphQLError::InvalidResponse { .. }
            | GraphQLError::InvalidRequest { .. } => ErrorKind::Client,
            GraphQLError::Server { .. } => ErrorKind::ServerError,
            GraphQLError::Execution { .. } => ErrorKind::Execution,
            GraphQLError::CircuitBreakerOpen { .. } => ErrorKind::CircuitOpen,
            GraphQLError::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Client
                }
            }
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GraphQLError::Authentication { .. } => Some(401),
            GraphQLError::Client { status, .. } | GraphQLError::Server { status, .. } => {
                Some(*status)
            }
            GraphQLError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn summarize_errors(errors: &[GraphQLErrorEntry]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Result not found: {key}")]
    NotFound { key: String },

    #[error("{format} serialization failed: {message}")]
    Serialization { format: String, message: String },

    #[error("Compression failed ({algorithm}): {message}")]
    Compression { algorithm: String, message: String },

    #[error("Serialization format {format} is not installed: {hint}")]
    FormatUnavailable { format: String, hint: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Execution manager errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("Schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: String },

    #[error("Scheduler already running")]
    SchedulerRunning,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for GraphQL operations
pub type GraphQLResult<T> = Result<T, GraphQLError>;

/// Result type alias for execution manager operations
pub type ManagerResult<T> = Result<T, ExecutionError>;
