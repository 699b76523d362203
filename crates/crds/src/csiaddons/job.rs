//! Shared schema for one-shot jobs and their cron parents

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{Condition, OperationResult};
use crate::references::JobReference;

/// Default number of attempts for a one-shot job
pub const DEFAULT_BACKOFF_LIMIT: i32 = 6;
/// Upper bound accepted for `backOffLimit`
pub const MAX_BACKOFF_LIMIT: i32 = 60;
/// Default retry deadline in seconds
pub const DEFAULT_RETRY_DEADLINE_SECONDS: i64 = 600;
/// Upper bound accepted for `retryDeadlineSeconds`
pub const MAX_RETRY_DEADLINE_SECONDS: i64 = 1800;
/// Default successful job history kept by a cron parent
pub const DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT: i32 = 3;
/// Default failed job history kept by a cron parent
pub const DEFAULT_FAILED_JOBS_HISTORY_LIMIT: i32 = 1;

/// Default for `backOffLimit`
pub fn default_backoff_limit() -> i32 {
    DEFAULT_BACKOFF_LIMIT
}

/// Default for `retryDeadlineSeconds`
pub fn default_retry_deadline_seconds() -> i64 {
    DEFAULT_RETRY_DEADLINE_SECONDS
}

/// Default for `successfulJobsHistoryLimit`
pub fn default_successful_jobs_history_limit() -> i32 {
    DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT
}

/// Default for `failedJobsHistoryLimit`
pub fn default_failed_jobs_history_limit() -> i32 {
    DEFAULT_FAILED_JOBS_HISTORY_LIMIT
}

/// Observed state of a one-shot job
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OneShotStatus {
    /// Terminal result; unset while the job is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,

    /// Human-readable outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// First time the controller picked the job up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Time the result was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Failed attempts so far
    #[serde(default)]
    pub retries: i32,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl OneShotStatus {
    /// True once a result has been recorded
    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }
}

/// What a cron parent does when a tick fires while a job is still running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Skip the tick and log it
    #[default]
    Forbid,

    /// Delete the running job and start a new one
    Replace,
}

/// Observed state of a cron parent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronJobStatus {
    /// Most recently emitted job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<JobReference>,

    /// Tick time of the most recently emitted job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,

    /// Completion time of the most recent successful job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<DateTime<Utc>>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
