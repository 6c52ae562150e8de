use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AdaptiveConfig;
use crate::models::{Endpoint, ExecutionResult, Query};

/// Dispatch policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// All at once, bounded by `max_concurrent`. Results in completion order.
    Parallel,
    /// One at a time in input order.
    Sequential,
    /// Highest priority tier first, ties in input order.
    Priority,
    /// Windows whose size follows the observed error rate.
    Adaptive,
}

impl std::fmt::Display for BatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchMode::Parallel => "parallel",
            BatchMode::Sequential => "sequential",
            BatchMode::Priority => "priority",
            BatchMode::Adaptive => "adaptive",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(BatchMode::Parallel),
            "sequential" => Ok(BatchMode::Sequential),
            "priority" => Ok(BatchMode::Priority),
            "adaptive" => Ok(BatchMode::Adaptive),
            _ => Err(format!("Unknown batch mode: {}", s)),
        }
    }
}

/// One member of a batch.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub query: Query,
    pub endpoint: Endpoint,
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    /// Higher runs first in [`BatchMode::Priority`].
    pub priority: i32,
    /// Per-attempt timeout; the endpoint's own timeout when unset.
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(query: Query, endpoint: Endpoint) -> Self {
        Self {
            query,
            endpoint,
            variables: None,
            priority: 0,
            timeout: None,
        }
    }

    pub fn with_variables(mut self, variables: serde_json::Map<String, serde_json::Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a batch. Every submitted request yields exactly one result.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub mode: BatchMode,
    pub results: Vec<ExecutionResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

impl BatchResult {
    pub(crate) fn new(mode: BatchMode, results: Vec<ExecutionResult>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            mode,
            failed: results.len() - succeeded,
            succeeded,
            results,
            total_duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Fraction of successful results; 0.0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.succeeded as f64 / self.results.len() as f64
        }
    }
}

/// Feedback controller for adaptive batches.
///
/// After each window: an error rate at or above the threshold multiplies
/// concurrency by `decrease_factor`, anything lower adds `increase_step`.
/// Concurrency stays within `[1, max_concurrent]`.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    concurrency: usize,
    max_concurrent: usize,
    config: AdaptiveConfig,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            concurrency: config.initial_concurrency.clamp(1, max_concurrent),
            max_concurrent,
            config,
        }
    }

    /// Size of the next window.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Feed one window's outcome and return the next concurrency.
    pub fn observe(&mut self, succeeded: usize, failed: usize) -> usize {
        let total = succeeded + failed;
        if total == 0 {
            return self.concurrency;
        }

        let error_rate = failed as f64 / total as f64;
        let next = if error_rate >= self.config.error_rate_threshold {
            let scaled = self.concurrency as f64 * self.config.decrease_factor;
            if scaled.is_finite() && scaled > 0.0 {
                scaled.floor() as usize
            } else {
                1
            }
        } else {
            self.concurrency.saturating_add(self.config.increase_step)
        };

        self.concurrency = next.clamp(1, self.max_concurrent);
        self.concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max: usize) -> AdaptiveController {
        AdaptiveController::new(AdaptiveConfig::default(), max)
    }

    #[test]
    fn test_starts_conservative() {
        let c = controller(10);
        assert_eq!(c.concurrency(), AdaptiveConfig::default().initial_concurrency);
        assert_eq!(controller(1).concurrency(), 1);
    }

    #[test]
    fn test_grows_while_healthy_and_caps() {
        let mut c = controller(4);
        let mut last = c.concurrency();
        for _ in 0..10 {
            let next = c.observe(last, 0);
            assert!(next >= last);
            assert!(next <= 4);
            last = next;
        }
        assert_eq!(last, 4);
    }

    #[test]
    fn test_backs_off_on_errors_and_floors_at_one() {
        let mut c = controller(10);
        c.observe(2, 0);
        c.observe(3, 0);
        let before = c.concurrency();
        let after = c.observe(0, before);
        assert!(after < before);
        for _ in 0..10 {
            c.observe(0, 5);
        }
        assert_eq!(c.concurrency(), 1);
    }

    #[test]
    fn test_zero_decrease_factor_still_floors_at_one() {
        let config = AdaptiveConfig {
            decrease_factor: 0.0,
            ..AdaptiveConfig::default()
        };
        let mut c = AdaptiveController::new(config, 8);
        assert_eq!(c.observe(0, 3), 1);
    }

    #[test]
    fn test_empty_window_keeps_level() {
        let mut c = controller(10);
        let level = c.concurrency();
        assert_eq!(c.observe(0, 0), level);
    }

    #[test]
    fn test_batch_result_counts() {
        let mut ok = ExecutionResult::pending("q", "e");
        ok.complete(None, 5);
        let mut bad = ExecutionResult::pending("q", "e");
        bad.fail("boom", 5, false);

        let batch = BatchResult::new(BatchMode::Parallel, vec![ok, bad], Duration::from_millis(7));
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.total(), 2);
        assert_eq!(batch.success_rate(), 0.5);
        assert_eq!(batch.total_duration_ms, 7);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("ADAPTIVE".parse::<BatchMode>().unwrap(), BatchMode::Adaptive);
        assert!("random".parse::<BatchMode>().is_err());
    }
}
