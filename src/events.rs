//! Structured events emitted at fixed instrumentation points.
//!
//! Every event has a fixed set of fields. Emission goes through `tracing`, so
//! the subscriber installed by the binary decides formatting and routing.

use tracing::{info, warn};

use crate::models::ExecutionStatus;
use crate::resilience::CircuitState;

/// An instrumentation event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<'a> {
    /// An execution was dispatched.
    ExecutionStarted {
        execution_id: &'a str,
        query_id: &'a str,
        endpoint_id: &'a str,
        complexity_score: u32,
    },
    /// An execution reached a terminal status.
    ExecutionFinished {
        execution_id: &'a str,
        endpoint_id: &'a str,
        status: ExecutionStatus,
        response_time_ms: u64,
        error: Option<&'a str>,
    },
    /// A failed attempt will be retried after `delay_ms`.
    RetryAttempt {
        endpoint_id: &'a str,
        attempt: u32,
        delay_ms: u64,
        error: &'a str,
    },
    /// A circuit breaker changed state.
    BreakerTransition {
        endpoint_id: &'a str,
        from: CircuitState,
        to: CircuitState,
        failure_count: u32,
        success_count: u32,
    },
}

impl Event<'_> {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ExecutionStarted { .. } => "execution_started",
            Event::ExecutionFinished { .. } => "execution_finished",
            Event::RetryAttempt { .. } => "retry_attempt",
            Event::BreakerTransition { .. } => "breaker_transition",
        }
    }
}

/// Emit an event through the tracing pipeline.
pub fn emit(event: &Event<'_>) {
    let name = event.name();
    match event {
        Event::ExecutionStarted {
            execution_id,
            query_id,
            endpoint_id,
            complexity_score,
        } => info!(
            event = name,
            execution_id,
            query_id,
            endpoint_id,
            complexity_score,
            "Execution started"
        ),
        Event::ExecutionFinished {
            execution_id,
            endpoint_id,
            status,
            response_time_ms,
            error,
        } => {
            if let Some(error) = error {
                warn!(
                    event = name,
                    execution_id,
                    endpoint_id,
                    status = %status,
                    response_time_ms,
                    error,
                    "Execution finished"
                );
            } else {
                info!(
                    event = name,
                    execution_id,
                    endpoint_id,
                    status = %status,
                    response_time_ms,
                    "Execution finished"
                );
            }
        }
        Event::RetryAttempt {
            endpoint_id,
            attempt,
            delay_ms,
            error,
        } => warn!(
            event = name,
            endpoint_id,
            attempt,
            delay_ms,
            error,
            "Retrying GraphQL request"
        ),
        Event::BreakerTransition {
            endpoint_id,
            from,
            to,
            failure_count,
            success_count,
        } => info!(
            event = name,
            endpoint_id,
            from = %from,
            to = %to,
            failure_count,
            success_count,
            "Circuit breaker state transition"
        ),
    }
}
