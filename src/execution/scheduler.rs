//! Cron-driven schedule bookkeeping.
//!
//! The table is pure state; the manager owns the loop that sleeps until
//! [`ScheduleTable::next_wake`] and dispatches what [`ScheduleTable::take_due`]
//! hands back.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, ManagerResult};
use crate::models::{Endpoint, Query};

/// A query bound to an endpoint and a cron expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledExecution {
    pub id: String,
    pub query: Query,
    pub endpoint: Endpoint,
    /// Expression as given by the caller.
    pub cron_expression: String,
    /// Overrides merged over the query's own variables.
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    /// Cleared once the expression has no future occurrence.
    pub enabled: bool,
}

/// Parse a cron expression. Five-field (minute-first) expressions get a
/// leading `0` seconds field.
pub fn parse_cron(expression: &str) -> ManagerResult<Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| ExecutionError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug)]
struct Entry {
    execution: ScheduledExecution,
    schedule: Schedule,
}

/// In-memory schedule table keyed by schedule id.
#[derive(Debug, Default)]
pub(crate) struct ScheduleTable {
    entries: HashMap<String, Entry>,
}

impl ScheduleTable {
    /// Validate the expression and add a new entry.
    pub(crate) fn add(
        &mut self,
        query: Query,
        endpoint: Endpoint,
        cron_expression: &str,
        variables: Option<serde_json::Map<String, serde_json::Value>>,
        now: DateTime<Utc>,
    ) -> ManagerResult<ScheduledExecution> {
        let schedule = parse_cron(cron_expression)?;
        let next_run = schedule.after(&now).next();
        let execution = ScheduledExecution {
            id: Uuid::new_v4().to_string(),
            query,
            endpoint,
            cron_expression: cron_expression.to_string(),
            variables,
            next_run,
            last_run: None,
            run_count: 0,
            enabled: next_run.is_some(),
        };

        self.entries.insert(
            execution.id.clone(),
            Entry {
                execution: execution.clone(),
                schedule,
            },
        );
        Ok(execution)
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub(crate) fn get(&self, id: &str) -> Option<ScheduledExecution> {
        self.entries.get(id).map(|e| e.execution.clone())
    }

    /// Snapshot ordered by next run, disabled entries last.
    pub(crate) fn list(&self) -> Vec<ScheduledExecution> {
        let mut list: Vec<_> = self.entries.values().map(|e| e.execution.clone()).collect();
        list.sort_by_key(|s| (s.next_run.is_none(), s.next_run));
        list
    }

    /// Earliest next run across enabled entries.
    pub(crate) fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.entries
            .values()
            .filter(|e| e.execution.enabled)
            .filter_map(|e| e.execution.next_run)
            .min()
    }

    /// Entries due at `now`. Each is advanced to its next occurrence before
    /// being returned, so a slow firing never fires twice.
    pub(crate) fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledExecution> {
        let mut due = Vec::new();
        for entry in self.entries.values_mut() {
            let execution = &mut entry.execution;
            if !execution.enabled || execution.next_run.map_or(true, |t| t > now) {
                continue;
            }
            execution.last_run = Some(now);
            execution.run_count += 1;
            execution.next_run = entry.schedule.after(&now).next();
            execution.enabled = execution.next_run.is_some();
            due.push(execution.clone());
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
