//! Retry policy for agent calls.
//!
//! Every call is retried a bounded number of times with exponential backoff
//! and jitter. Terminal errors stop immediately. Each attempt runs under a
//! per-call timeout, and all attempts together run under a deadline after
//! which the call is abandoned; longer-horizon retries belong to the
//! reconcile loop's requeue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::agent_trait::AgentClientTrait;
use crate::error::AgentError;
use crate::models::*;

/// Bounded retry configuration for agent calls
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each retry
    pub multiplier: f64,
    /// Timeout of a single attempt
    pub call_timeout: Duration,
    /// Budget for all attempts together
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy issuing exactly one attempt
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Runs `call` until it succeeds, fails terminally, or the budget runs out.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        let mut delay = self.initial_backoff;

        loop {
            attempt += 1;

            let remaining = self.deadline.saturating_sub(started.elapsed());
            let timeout = self.call_timeout.min(remaining);
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(AgentError::Timeout {
                    operation: operation.to_string(),
                    timeout,
                }),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    error = %err,
                    "Agent call failed with a terminal error"
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    operation = %operation,
                    attempt = attempt,
                    error = %err,
                    "Agent call failed after max attempts"
                );
                return Err(err);
            }

            // Add jitter: 0.5x to 1.5x of the delay
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

            if started.elapsed() + jittered_delay >= self.deadline {
                error!(
                    operation = %operation,
                    attempt = attempt,
                    error = %err,
                    "Agent call deadline exceeded"
                );
                return Err(AgentError::DeadlineExceeded {
                    operation: operation.to_string(),
                    deadline: self.deadline,
                    last: Box::new(err),
                });
            }

            warn!(
                operation = %operation,
                attempt = attempt,
                error = %err,
                delay_ms = jittered_delay.as_millis(),
                "Agent call failed, retrying"
            );

            tokio::time::sleep(jittered_delay).await;

            // Exponential backoff, capped at max_backoff
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Applies a `RetryPolicy` to every call of an inner client
#[derive(Clone)]
pub struct RetryingAgentClient {
    inner: Arc<dyn AgentClientTrait>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingAgentClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingAgentClient {
    /// Wraps `inner` with `policy`
    pub fn new(inner: Arc<dyn AgentClientTrait>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The policy applied to every call
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl AgentClientTrait for RetryingAgentClient {
    async fn fence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.policy.execute("fence", || self.inner.fence(request)).await
    }

    async fn unfence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.policy.execute("unfence", || self.inner.unfence(request)).await
    }

    async fn reclaim_space(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.policy.execute("reclaim_space", || self.inner.reclaim_space(request)).await
    }

    async fn rotate_key(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.policy.execute("rotate_key", || self.inner.rotate_key(request)).await
    }

    async fn enable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.policy
            .execute("enable_replication", || self.inner.enable_replication(request))
            .await
    }

    async fn disable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.policy
            .execute("disable_replication", || self.inner.disable_replication(request))
            .await
    }

    async fn promote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.policy.execute("promote", || self.inner.promote(request)).await
    }

    async fn demote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.policy.execute("demote", || self.inner.demote(request)).await
    }

    async fn resync(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.policy.execute("resync", || self.inner.resync(request)).await
    }

    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupResponse, AgentError> {
        self.policy.execute("create_group", || self.inner.create_group(request)).await
    }

    async fn add_volume_to_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.policy
            .execute("add_volume_to_group", || self.inner.add_volume_to_group(request))
            .await
    }

    async fn remove_volume_from_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.policy
            .execute("remove_volume_from_group", || self.inner.remove_volume_from_group(request))
            .await
    }

    async fn delete_group(&self, request: &DeleteGroupRequest) -> Result<(), AgentError> {
        self.policy.execute("delete_group", || self.inner.delete_group(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tonic::Code;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(1),
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result = fast_policy(3).execute("op", || async { Ok::<_, AgentError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        let result = fast_policy(3)
            .execute("promote", || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AgentError::status(Code::Unavailable, "agent restarting"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_stops_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        let result: Result<(), AgentError> = fast_policy(5)
            .execute("reclaim_space", || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::status(Code::NotFound, "volume not found")) }
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        let result: Result<(), AgentError> = fast_policy(3)
            .execute("demote", || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::status(Code::Unknown, "flaky")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(50),
            ..fast_policy(1)
        };

        let result: Result<(), AgentError> = policy
            .execute("fence", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AgentError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_call() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_backoff: Duration::from_millis(400),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(1),
            deadline: Duration::from_secs(2),
        };

        let result: Result<(), AgentError> = policy
            .execute("resync", || async { Err(AgentError::status(Code::Unavailable, "down")) })
            .await;

        match result {
            Err(AgentError::DeadlineExceeded { last, .. }) => {
                assert_eq!(last.code(), Some(Code::Unavailable));
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
    }
}
