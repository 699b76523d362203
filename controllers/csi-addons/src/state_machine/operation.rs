//! One-shot operation lifecycle
//!
//! A job runs until it records a result and is never executed again after
//! that. Failed attempts are counted against `backOffLimit` and the whole job
//! against `retryDeadlineSeconds`; whichever runs out first fails the job
//! with the last error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::{
    Condition, ConditionStatus, MAX_BACKOFF_LIMIT, MAX_RETRY_DEADLINE_SECONDS, OneShotStatus, OperationResult,
    condition_type, set_condition,
};

use crate::backoff::FibonacciBackoff;

const RETRY_DELAY_MIN: Duration = Duration::from_secs(2);
const RETRY_DELAY_MAX: Duration = Duration::from_secs(60);

/// Attempt and time limits of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Attempts before the job fails
    pub backoff_limit: i32,
    /// Time after the first attempt at which the job fails
    pub retry_deadline: chrono::Duration,
}

impl RetryBudget {
    /// Budget from the job spec, clamped to the accepted ranges
    pub fn new(back_off_limit: i32, retry_deadline_seconds: i64) -> Self {
        Self {
            backoff_limit: back_off_limit.clamp(1, MAX_BACKOFF_LIMIT),
            retry_deadline: chrono::Duration::seconds(retry_deadline_seconds.clamp(1, MAX_RETRY_DEADLINE_SECONDS)),
        }
    }

    fn deadline_passed(&self, status: &OneShotStatus, now: DateTime<Utc>) -> bool {
        status
            .start_time
            .is_some_and(|start| now.signed_duration_since(start) >= self.retry_deadline)
    }
}

/// What a pass over a job should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStep {
    /// The job already has a result
    Done,
    /// Call the agent
    Attempt,
    /// The budget is spent; record Failed with this message
    Fail(String),
}

/// Picks the next step for a job
pub fn next_step(status: &OneShotStatus, budget: &RetryBudget, now: DateTime<Utc>) -> OperationStep {
    if status.is_terminal() {
        return OperationStep::Done;
    }
    let last = status.message.as_deref().unwrap_or("no attempt completed");
    if budget.deadline_passed(status, now) {
        return OperationStep::Fail(format!("retry deadline exceeded: {}", last));
    }
    if status.retries >= budget.backoff_limit {
        return OperationStep::Fail(format!("backoff limit reached: {}", last));
    }
    OperationStep::Attempt
}

/// Stamps the first time the job was picked up
pub fn start(status: &mut OneShotStatus, now: DateTime<Utc>) {
    if status.start_time.is_none() {
        status.start_time = Some(now);
    }
}

/// Records the terminal success
pub fn apply_success(status: &mut OneShotStatus, message: &str, now: DateTime<Utc>) {
    status.result = Some(OperationResult::Succeeded);
    status.message = Some(message.to_string());
    status.completion_time = Some(now);
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::True, "Succeeded", message),
    );
}

/// Records the terminal failure
pub fn fail(status: &mut OneShotStatus, message: &str, now: DateTime<Utc>) {
    status.result = Some(OperationResult::Failed);
    status.message = Some(message.to_string());
    status.completion_time = Some(now);
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::False, "Failed", message),
    );
}

/// Records a failed attempt.
///
/// Returns the delay before the next attempt, or `None` once the job has
/// been marked Failed.
pub fn apply_failure(
    status: &mut OneShotStatus,
    error: &str,
    terminal: bool,
    budget: &RetryBudget,
    now: DateTime<Utc>,
) -> Option<Duration> {
    status.retries += 1;
    status.message = Some(error.to_string());

    if terminal {
        fail(status, error, now);
        return None;
    }
    match next_step(status, budget, now) {
        OperationStep::Fail(message) => {
            fail(status, &message, now);
            None
        }
        _ => Some(retry_delay(status.retries)),
    }
}

/// Delay before retrying after `retries` failed attempts
pub fn retry_delay(retries: i32) -> Duration {
    FibonacciBackoff::calculate_for_error_count(retries.max(0) as u32, RETRY_DELAY_MIN, RETRY_DELAY_MAX)
}
