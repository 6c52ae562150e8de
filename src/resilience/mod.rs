//! Endpoint protection: per-endpoint circuit breakers and retry backoff.
//!
//! ```text
//! ResilientClient::execute
//!   ├─ CircuitBreaker::is_request_allowed ── rejected → CircuitBreakerOpen
//!   ├─ GraphQLTransport::send (per-attempt timeout)
//!   └─ on failure: RetryConfig::is_retryable → backoff sleep → next attempt
//! ```

mod circuit_breaker;
mod client;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
pub use client::ResilientClient;
pub use retry::RetryConfig;
