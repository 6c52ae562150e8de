use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::storage::{CompressionType, SerializationFormat, StorageBackendType};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub execution: ExecutionConfig,
    pub storage: StorageConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request defaults, used when an endpoint record does not override them
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Circuit breaker thresholds shared by every per-endpoint breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,

    /// Time to wait before attempting recovery (milliseconds)
    pub recovery_timeout_ms: u64,
}

/// Batch execution tuning
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Hard ceiling on concurrently running executions in a batch
    pub max_concurrent: usize,
    /// Adaptive mode controller settings
    pub adaptive: AdaptiveConfig,
}

/// Feedback controller settings for adaptive batches
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Concurrency for the first window
    pub initial_concurrency: usize,
    /// Error rate (0.0 - 1.0) at or above which concurrency is reduced
    pub error_rate_threshold: f64,
    /// Added to concurrency after a healthy window
    pub increase_step: usize,
    /// Multiplied into concurrency after an unhealthy window
    pub decrease_factor: f64,
}

/// Result storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
    pub serialization: SerializationFormat,
    pub compression: CompressionType,
    /// Root directory for the filesystem backend
    pub base_path: PathBuf,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/graphql-ops.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: parse_env("CB_FAILURE_THRESHOLD", 5),
            success_threshold: parse_env("CB_SUCCESS_THRESHOLD", 2),
            recovery_timeout_ms: parse_env("CB_RECOVERY_TIMEOUT_MS", 60_000),
        };

        let defaults = AdaptiveConfig::default();
        let execution = ExecutionConfig {
            max_concurrent: parse_env("MAX_CONCURRENT", 10).max(1),
            adaptive: AdaptiveConfig {
                initial_concurrency: parse_env(
                    "ADAPTIVE_INITIAL_CONCURRENCY",
                    defaults.initial_concurrency,
                ),
                error_rate_threshold: parse_env(
                    "ADAPTIVE_ERROR_RATE_THRESHOLD",
                    defaults.error_rate_threshold,
                ),
                increase_step: parse_env("ADAPTIVE_INCREASE_STEP", defaults.increase_step),
                decrease_factor: parse_env("ADAPTIVE_DECREASE_FACTOR", defaults.decrease_factor),
            },
        };

        let storage = StorageConfig {
            backend: parse_enum_env("STORAGE_BACKEND", StorageBackendType::Database)?,
            serialization: parse_enum_env("STORAGE_SERIALIZATION", SerializationFormat::Json)?,
            compression: parse_enum_env("STORAGE_COMPRESSION", CompressionType::Gzip)?,
            base_path: PathBuf::from(
                env::var("STORAGE_BASE_PATH").unwrap_or_else(|_| "./data/results".to_string()),
            ),
            cache_enabled: env::var("STORAGE_CACHE_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            cache_ttl_secs: parse_env("STORAGE_CACHE_TTL_SECS", 300),
        };

        Ok(Config {
            database,
            logging,
            request,
            circuit_breaker,
            execution,
            storage,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_enum_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = String>,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|message| AppError::Config { message }),
        Err(_) => Ok(default),
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Get recovery timeout as Duration.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_concurrency: 2,
            error_rate_threshold: 0.2,
            increase_step: 1,
            decrease_factor: 0.5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::Database,
            serialization: SerializationFormat::Json,
            compression: CompressionType::Gzip,
            base_path: PathBuf::from("./data/results"),
            cache_enabled: true,
            cache_ttl_secs: 300,
        }
    }
}

impl StorageConfig {
    /// Get cache TTL as Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
