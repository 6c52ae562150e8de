//! Records consumed and produced by the execution core.
//!
//! `Endpoint` and `Query` arrive already loaded from the persistence layer;
//! `ExecutionResult` and `HealthCheck` are produced here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resilience::CircuitState;

/// Authentication scheme for an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No authentication headers.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `Authorization: Basic base64(user:pass)`.
    Basic,
    /// Custom header carrying an API key.
    ApiKey,
    /// Pre-obtained OAuth2 access token sent as a bearer token.
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthType::None => write!(f, "none"),
            AuthType::Bearer => write!(f, "bearer"),
            AuthType::Basic => write!(f, "basic"),
            AuthType::ApiKey => write!(f, "api_key"),
            AuthType::OAuth2 => write!(f, "oauth2"),
        }
    }
}

impl std::str::FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(AuthType::None),
            "bearer" => Ok(AuthType::Bearer),
            "basic" => Ok(AuthType::Basic),
            "api_key" | "apikey" => Ok(AuthType::ApiKey),
            "oauth2" => Ok(AuthType::OAuth2),
            _ => Err(format!("Unknown auth type: {}", s)),
        }
    }
}

/// A GraphQL endpoint as loaded from persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique endpoint identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// GraphQL HTTP URL.
    pub url: String,
    /// Authentication scheme.
    #[serde(default)]
    pub auth_type: AuthType,
    /// Scheme-specific settings (`token`, `username`, `password`, `api_key`, `header_name`, `access_token`).
    #[serde(default)]
    pub auth_config: HashMap<String, String>,
    /// Extra static headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-attempt timeout.
    pub timeout_seconds: u64,
    /// Retry budget for calls against this endpoint.
    pub max_retries: u32,
    /// Base backoff delay.
    pub retry_delay_seconds: f64,
}

impl Endpoint {
    /// Create an endpoint with no authentication and default limits.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            auth_type: AuthType::None,
            auth_config: HashMap::new(),
            headers: HashMap::new(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1.0,
        }
    }

    /// Set the endpoint identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the authentication scheme and its settings.
    pub fn with_auth(mut self, auth_type: AuthType, config: HashMap<String, String>) -> Self {
        self.auth_type = auth_type;
        self.auth_config = config;
        self
    }

    /// Add a static header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set retry count and base delay.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_seconds: f64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_seconds = retry_delay_seconds;
        self
    }
}

/// A stored GraphQL query as loaded from persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Unique query identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Raw GraphQL document.
    pub query_text: String,
    /// Default variables.
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Operation to run when the document holds several.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl Query {
    /// Create a query with no variables.
    pub fn new(name: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            query_text: query_text.into(),
            variables: serde_json::Map::new(),
            operation_name: None,
        }
    }

    /// Set the query identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the default variables.
    pub fn with_variables(mut self, variables: serde_json::Map<String, serde_json::Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Set the operation name.
    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Retrying,
}

impl ExecutionStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Retrying => "retrying",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one query execution against one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub query_id: String,
    pub endpoint_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub data: Option<serde_json::Value>,
    /// Complexity score computed before dispatch.
    pub complexity_score: Option<u32>,
    /// Storage key when the result was persisted.
    pub storage_key: Option<String>,
    /// Retries performed after the first attempt.
    #[serde(default)]
    pub retry_count: u32,
}

impl ExecutionResult {
    /// Create a pending result at dispatch time.
    pub fn pending(query_id: impl Into<String>, endpoint_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            query_id: query_id.into(),
            endpoint_id: endpoint_id.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            response_time_ms: None,
            error_message: None,
            data: None,
            complexity_score: None,
            storage_key: None,
            retry_count: 0,
        }
    }

    /// Move to `Running`. Ignored once terminal.
    pub fn mark_running(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    /// Move to `Retrying` before retry `attempt`. Ignored once terminal.
    pub fn mark_retrying(&mut self, attempt: u32) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Retrying;
        self.retry_count = attempt;
    }

    /// Finish successfully. Ignored once terminal.
    pub fn complete(&mut self, data: Option<serde_json::Value>, response_time_ms: u64) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Completed;
        self.success = true;
        self.data = data;
        self.response_time_ms = Some(response_time_ms);
        self.completed_at = Some(Utc::now());
    }

    /// Finish with an error. `timed_out` selects `Timeout` over `Failed`. Ignored once terminal.
    pub fn fail(&mut self, message: impl Into<String>, response_time_ms: u64, timed_out: bool) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if timed_out {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failed
        };
        self.success = false;
        self.error_message = Some(message.into());
        self.response_time_ms = Some(response_time_ms);
        self.completed_at = Some(Utc::now());
    }
}

/// Result of probing an endpoint with a trivial query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub endpoint_id: String,
    pub checked_at: DateTime<Utc>,
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub circuit_state: CircuitState,
}
