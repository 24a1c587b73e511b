//! Execution settings and run records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::steps::{StepResult, StepStatus};

/// Executor policy. The run kind comes from the operation called; single steps and
/// selected batches share the batch settings, one-click runs override some of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Halt a batch at the first failed step
    pub stop_on_error: bool,
    pub auto_retry_failed: bool,
    pub max_step_retries: u32,
    pub step_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// Inter-step delay of a one-click run
    pub one_click_step_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            auto_retry_failed: true,
            max_step_retries: 2,
            step_delay_ms: 500,
            retry_delay_ms: 500,
            one_click_step_delay_ms: 1000,
        }
    }
}

impl ExecutionConfig {
    pub(crate) fn batch_policy(&self) -> RunPolicy {
        RunPolicy {
            stop_on_error: self.stop_on_error,
            auto_retry_failed: self.auto_retry_failed,
            max_step_retries: self.max_step_retries,
            step_delay: Duration::from_millis(self.step_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// One-click runs never stop on error and always retry
    pub(crate) fn one_click_policy(&self) -> RunPolicy {
        RunPolicy {
            stop_on_error: false,
            auto_retry_failed: true,
            step_delay: Duration::from_millis(self.one_click_step_delay_ms),
            ..self.batch_policy()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunPolicy {
    pub stop_on_error: bool,
    pub auto_retry_failed: bool,
    pub max_step_retries: u32,
    pub step_delay: Duration,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Record of one batch or one-click run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// In execution order, repeated ids included
    pub executed_steps: Vec<String>,
    pub successful_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub step_results: BTreeMap<String, StepResult>,
    #[serde(rename = "total_time_ms", serialize_with = "serialize_millis")]
    pub total_time: Duration,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub(crate) fn new(execution_id: String) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Running,
            executed_steps: Vec::new(),
            successful_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            step_results: BTreeMap::new(),
            total_time: Duration::ZERO,
            error_message: None,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn record(&mut self, step_id: &str, result: StepResult) {
        self.executed_steps.push(step_id.to_string());
        match result.status {
            StepStatus::Success => self.successful_steps.push(step_id.to_string()),
            StepStatus::Failed => self.failed_steps.push(step_id.to_string()),
            StepStatus::Skipped => self.skipped_steps.push(step_id.to_string()),
            StepStatus::Pending | StepStatus::Running => {},
        }
        self.step_results.insert(step_id.to_string(), result);
    }

    /// Successful share of executed steps, in percent
    pub fn success_rate(&self) -> f64 {
        if self.executed_steps.is_empty() {
            return 0.0;
        }
        self.successful_steps.len() as f64 / self.executed_steps.len() as f64 * 100.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.insert("success_rate".to_string(), self.success_rate().into());
        }
        value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepStatistics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate_percent: f64,
}

/// Aggregates over the execution history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStatistics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub success_rate_percent: f64,
    pub step_statistics: BTreeMap<String, StepStatistics>,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10000.0).round() / 100.0
}

impl ExecutionStatistics {
    pub fn from_history(history: &[ExecutionResult]) -> Self {
        let mut stats = ExecutionStatistics {
            total_executions: history.len() as u64,
            ..Default::default()
        };

        for execution in history {
            match execution.status {
                ExecutionStatus::Completed => stats.successful_executions += 1,
                ExecutionStatus::Failed => stats.failed_executions += 1,
                ExecutionStatus::Cancelled => stats.cancelled_executions += 1,
                _ => {},
            }
            for (step_id, result) in &execution.step_results {
                let entry = stats.step_statistics.entry(step_id.clone()).or_default();
                entry.total += 1;
                match result.status {
                    StepStatus::Success => entry.success += 1,
                    StepStatus::Failed => entry.failed += 1,
                    _ => {},
                }
            }
        }

        stats.success_rate_percent = percent(stats.successful_executions, stats.total_executions);
        for entry in stats.step_statistics.values_mut() {
            entry.success_rate_percent = percent(entry.success, entry.total);
        }
        stats
    }
}
