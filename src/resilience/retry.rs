//! Retry eligibility and exponential backoff.

use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;

use crate::error::{ErrorKind, GraphQLError};
use crate::models::Endpoint;

/// Retry behaviour for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Multiply each delay by a random factor in [0.5, 1.0)
    pub jitter: bool,
    pub retry_on_timeout: bool,
    pub retry_on_network: bool,
    pub retry_on_server_error: bool,
    pub retry_on_auth_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retry_on_timeout: true,
            retry_on_network: true,
            retry_on_server_error: true,
            retry_on_auth_error: false,
        }
    }
}

impl RetryConfig {
    /// Defaults with retry count and base delay taken from the endpoint record.
    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            max_retries: endpoint.max_retries,
            base_delay: Duration::from_secs_f64(endpoint.retry_delay_seconds.max(0.0)),
            ..Self::default()
        }
    }

    /// Disable jitter, mostly useful for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether a failure of this kind may be retried.
    pub fn is_retryable(&self, error: &GraphQLError) -> bool {
        match error.kind() {
            ErrorKind::Timeout => self.retry_on_timeout,
            ErrorKind::Network => self.retry_on_network,
            ErrorKind::ServerError => self.retry_on_server_error,
            ErrorKind::Authentication => self.retry_on_auth_error,
            ErrorKind::Client | ErrorKind::Execution | ErrorKind::CircuitOpen => false,
        }
    }

    /// Undithered delay for `attempt` (0-based): `min(base * exp^attempt, max)`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay to wait before the retry following `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        if !self.jitter {
            return raw;
        }
        let factor: f64 = OsRng.gen_range(0.5..1.0);
        raw.mul_f64(factor)
    }
}
