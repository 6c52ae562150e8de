//! Per-endpoint circuit breaker.
//!
//! The breaker stops issuing requests to an endpoint after repeated failures
//! and periodically lets a trial request through to detect recovery. It uses
//! the standard closed/open/half-open state machine.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests are allowed
//! - **Open**: Rejecting requests after too many failures
//! - **Half-Open**: Recovery timeout elapsed, trial requests allowed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;
use crate::events::{self, Event};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Rejecting requests - too many failures
    Open,
    /// Testing recovery - trial requests allowed
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Circuit breaker guarding a single endpoint.
///
/// Not internally synchronized; callers share it behind a lock so that every
/// read-modify-write happens under a single writer.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Endpoint this breaker guards
    endpoint_id: String,

    state: CircuitState,

    /// Consecutive failures while closed (or the failure that reopened it)
    failure_count: u32,

    /// Consecutive successes while half-open
    success_count: u32,

    total_failures: u64,
    total_successes: u64,

    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,

    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker for an endpoint.
    pub fn new(endpoint_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure: None,
            last_state_change: Utc::now(),
            config,
        }
    }

    /// Check whether a request may be issued.
    ///
    /// While open, the first call after the recovery timeout has elapsed moves
    /// the breaker to half-open and returns `true`.
    pub fn is_request_allowed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.recovery_elapsed() {
                    self.transition_to(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn recovery_elapsed(&self) -> bool {
        let Some(last_fail) = self.last_failure else {
            // Open without a recorded failure cannot happen through the public API.
            return true;
        };
        match chrono::Duration::from_std(self.config.recovery_timeout()) {
            Ok(timeout) => Utc::now() - last_fail >= timeout,
            Err(_) => false,
        }
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        self.total_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {
                // A request admitted before the breaker opened finished late.
                tracing::debug!(
                    endpoint_id = %self.endpoint_id,
                    "Success recorded while circuit is open"
                );
            }
        }
    }

    /// Record a failed request.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.total_failures += 1;
        self.last_failure = Some(Utc::now());

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition_to(&mut self, new_state: CircuitState) {
        events::emit(&Event::BreakerTransition {
            endpoint_id: &self.endpoint_id,
            from: self.state,
            to: new_state,
            failure_count: self.failure_count,
            success_count: self.success_count,
        });
        self.state = new_state;
        self.last_state_change = Utc::now();
        self.success_count = 0;
        if new_state == CircuitState::Closed {
            self.failure_count = 0;
        }
    }

    /// Endpoint this breaker guards.
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures counted toward opening the circuit.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Successes counted toward closing the circuit from half-open.
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Get last failure time.
    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    /// Check if the circuit is open (rejecting requests).
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Time until a recovery attempt is allowed (if open).
    pub fn time_until_recovery(&self) -> Option<chrono::Duration> {
        if self.state != CircuitState::Open {
            return None;
        }

        let timeout = chrono::Duration::from_std(self.config.recovery_timeout()).ok()?;
        self.last_failure.map(|last_fail| {
            let elapsed = Utc::now() - last_fail;
            if elapsed >= timeout {
                chrono::Duration::zero()
            } else {
                timeout - elapsed
            }
        })
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        tracing::info!(
            endpoint_id = %self.endpoint_id,
            from = %self.state,
            "Circuit breaker manually reset to closed"
        );
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_state_change = Utc::now();
    }

    /// Get a summary of the current state for display.
    pub fn summary(&self) -> CircuitBreakerSummary {
        CircuitBreakerSummary {
            endpoint_id: self.endpoint_id.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            success_threshold: self.config.success_threshold,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            time_until_recovery: self.time_until_recovery(),
            last_state_change: self.last_state_change,
        }
    }
}

/// Summary of circuit breaker state for display.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSummary {
    pub endpoint_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub success_threshold: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Time until recovery attempt (if open)
    pub time_until_recovery: Option<chrono::Duration>,
    pub last_state_change: DateTime<Utc>,
}

impl std::fmt::Display for CircuitBreakerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Circuit Breaker [{}]: {} ",
            self.endpoint_id,
            self.state.to_string().to_uppercase()
        )?;

        match self.state {
            CircuitState::Closed => write!(f, "({} consecutive failures)", self.failure_count),
            CircuitState::Open => {
                if let Some(recovery) = self.time_until_recovery {
                    let secs = recovery.num_seconds();
                    if secs > 60 {
                        write!(f, "(recovery in {}m)", secs / 60)
                    } else {
                        write!(f, "(recovery in {}s)", secs)
                    }
                } else {
                    write!(f, "(recovering soon)")
                }
            }
            CircuitState::HalfOpen => write!(
                f,
                "({} consecutive successes needed)",
                self.success_threshold.saturating_sub(self.success_count)
            ),
        }
    }
}
