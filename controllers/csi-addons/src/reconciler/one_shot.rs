//! ReclaimSpaceJob and EncryptionKeyRotationJob reconciler
//!
//! Both kinds run one agent call against the volume behind a claim until a
//! result is recorded. Once terminal a job is never executed again; the
//! retry budget in the spec bounds how long it may keep trying.

use std::time::Duration;

use agent_client::{AgentClientTrait, AgentError, OperationResponse, VolumeRequest};
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use cluster_store::{ResourceStore, object_key};
use crds::{EncryptionKeyRotationJob, OneShotStatus, ReclaimSpaceJob};

use crate::driver::{Outcome, Reconcile};
use crate::error::ControllerError;
use crate::reconciler::{ClaimBinding, Reconciler, Stores};
use crate::state_machine::operation::{self, OperationStep, RetryBudget};

/// Volume operation a job kind performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOperation {
    ReclaimSpace,
    KeyRotation,
}

impl VolumeOperation {
    /// Operation name used in logs and timeouts
    pub fn name(self) -> &'static str {
        match self {
            VolumeOperation::ReclaimSpace => "reclaim_space",
            VolumeOperation::KeyRotation => "rotate_key",
        }
    }

    /// Status message recorded on success
    pub fn success_message(self) -> &'static str {
        match self {
            VolumeOperation::ReclaimSpace => "space reclamation operation successfully completed",
            VolumeOperation::KeyRotation => "encryption key rotation operation successfully completed",
        }
    }

    async fn invoke(
        self,
        agent: &dyn AgentClientTrait,
        request: &VolumeRequest,
    ) -> Result<OperationResponse, AgentError> {
        match self {
            VolumeOperation::ReclaimSpace => agent.reclaim_space(request).await,
            VolumeOperation::KeyRotation => agent.rotate_key(request).await,
        }
    }
}

/// Access to the fields every one-shot job kind shares
pub(crate) trait OneShotJob: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    const OPERATION: VolumeOperation;

    fn job_store(stores: &Stores) -> &dyn ResourceStore<Self>;
    fn target_claim(&self) -> &str;
    fn budget(&self) -> RetryBudget;
    fn timeout_seconds(&self) -> Option<i64>;
    fn job_status(&self) -> Option<&OneShotStatus>;
    fn set_job_status(&mut self, status: OneShotStatus);

    /// Per-call timeout, when the spec sets a positive one
    fn call_timeout(&self) -> Option<Duration> {
        self.timeout_seconds()
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
    }
}

impl OneShotJob for ReclaimSpaceJob {
    const OPERATION: VolumeOperation = VolumeOperation::ReclaimSpace;

    fn job_store(stores: &Stores) -> &dyn ResourceStore<Self> {
        stores.reclaim_space_jobs.as_ref()
    }

    fn target_claim(&self) -> &str {
        &self.spec.target.persistent_volume_claim
    }

    fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.spec.back_off_limit, self.spec.retry_deadline_seconds)
    }

    fn timeout_seconds(&self) -> Option<i64> {
        self.spec.timeout
    }

    fn job_status(&self) -> Option<&OneShotStatus> {
        self.status.as_ref()
    }

    fn set_job_status(&mut self, status: OneShotStatus) {
        self.status = Some(status);
    }
}

impl OneShotJob for EncryptionKeyRotationJob {
    const OPERATION: VolumeOperation = VolumeOperation::KeyRotation;

    fn job_store(stores: &Stores) -> &dyn ResourceStore<Self> {
        stores.encryption_key_rotation_jobs.as_ref()
    }

    fn target_claim(&self) -> &str {
        &self.spec.target.persistent_volume_claim
    }

    fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.spec.back_off_limit, self.spec.retry_deadline_seconds)
    }

    fn timeout_seconds(&self) -> Option<i64> {
        self.spec.timeout
    }

    fn job_status(&self) -> Option<&OneShotStatus> {
        self.status.as_ref()
    }

    fn set_job_status(&mut self, status: OneShotStatus) {
        self.status = Some(status);
    }
}

impl Reconciler {
    async fn write_job_status<J: OneShotJob>(&self, job: &J, status: OneShotStatus) -> Result<(), ControllerError> {
        if job.job_status() == Some(&status) {
            return Ok(());
        }
        let mut updated = job.clone();
        updated.set_job_status(status);
        J::job_store(&self.stores).replace_status(&updated).await?;
        Ok(())
    }

    async fn finish_job<J: OneShotJob>(
        &self,
        job: &J,
        mut status: OneShotStatus,
        message: &str,
    ) -> Result<Outcome, ControllerError> {
        warn!("{} {} failed: {}", J::kind(&()), object_key(job), message);
        operation::fail(&mut status, message, self.now());
        self.write_job_status(job, status).await?;
        Ok(Outcome::Done)
    }

    /// Counts a failed attempt and picks the requeue
    async fn job_attempt_failed<J: OneShotJob>(
        &self,
        job: &J,
        mut status: OneShotStatus,
        error: &str,
        terminal: bool,
    ) -> Result<Outcome, ControllerError> {
        let key = object_key(job);
        let outcome = match operation::apply_failure(&mut status, error, terminal, &job.budget(), self.now()) {
            Some(delay) => {
                warn!(
                    "{} {}: attempt {} failed, retrying in {:?}: {}",
                    J::kind(&()),
                    key,
                    status.retries,
                    delay,
                    error
                );
                Outcome::RequeueAfter(delay)
            }
            None => {
                warn!(
                    "{} {} failed: {}",
                    J::kind(&()),
                    key,
                    status.message.as_deref().unwrap_or(error)
                );
                Outcome::Done
            }
        };
        self.write_job_status(job, status).await?;
        Ok(outcome)
    }

    async fn call_volume_operation<J: OneShotJob>(
        &self,
        job: &J,
        request: &VolumeRequest,
    ) -> Result<OperationResponse, AgentError> {
        let call = J::OPERATION.invoke(self.agent.as_ref(), request);
        match job.call_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
                Err(AgentError::Timeout {
                    operation: J::OPERATION.name().to_string(),
                    timeout,
                })
            }),
            None => call.await,
        }
    }

    /// One pass over a one-shot job
    pub(crate) async fn run_one_shot<J: OneShotJob>(&self, job: J) -> Result<Outcome, ControllerError> {
        let key = object_key(&job);
        let namespace = job.namespace();
        let mut status = job.job_status().cloned().unwrap_or_default();
        let now = self.now();

        match operation::next_step(&status, &job.budget(), now) {
            OperationStep::Done => return Ok(Outcome::Done),
            OperationStep::Fail(message) => return self.finish_job(&job, status, &message).await,
            OperationStep::Attempt => {}
        }
        operation::start(&mut status, now);

        let claim = job.target_claim().to_string();
        if claim.is_empty() {
            return self
                .finish_job(&job, status, "target persistentVolumeClaim is not set")
                .await;
        }
        let volume = match self.resolve_claim(namespace.as_deref(), &claim).await? {
            ClaimBinding::Bound(volume) => volume,
            ClaimBinding::Missing => {
                let message = format!("PersistentVolumeClaim {} not found", claim);
                return self.finish_job(&job, status, &message).await;
            }
            ClaimBinding::Unbound => {
                let message = format!("PersistentVolumeClaim {} is not bound", claim);
                return self.job_attempt_failed(&job, status, &message, false).await;
            }
            ClaimBinding::NoCsiVolume => {
                let message = format!("PersistentVolumeClaim {} is not backed by a CSI volume", claim);
                return self.job_attempt_failed(&job, status, &message, false).await;
            }
        };

        let request = VolumeRequest {
            driver: volume.driver,
            volume_handle: volume.volume_handle,
            ..Default::default()
        };
        match self.call_volume_operation(&job, &request).await {
            Ok(response) => {
                match (response.pre_usage_bytes, response.post_usage_bytes) {
                    (Some(pre), Some(post)) => info!(
                        "{} {}: {} (freed {} bytes)",
                        J::kind(&()),
                        key,
                        J::OPERATION.success_message(),
                        pre.saturating_sub(post)
                    ),
                    _ => info!("{} {}: {}", J::kind(&()), key, J::OPERATION.success_message()),
                }
                operation::apply_success(&mut status, J::OPERATION.success_message(), self.now());
                self.write_job_status(&job, status).await?;
                Ok(Outcome::Done)
            }
            Err(e) => {
                let terminal = !e.is_retryable();
                self.job_attempt_failed(&job, status, &e.to_string(), terminal)
                    .await
            }
        }
    }
}

#[async_trait::async_trait]
impl Reconcile<ReclaimSpaceJob> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<ReclaimSpaceJob> {
        ReclaimSpaceJob::job_store(&self.stores)
    }

    async fn apply(&self, job: ReclaimSpaceJob) -> Result<Outcome, ControllerError> {
        self.run_one_shot(job).await
    }
}

#[async_trait::async_trait]
impl Reconcile<EncryptionKeyRotationJob> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<EncryptionKeyRotationJob> {
        EncryptionKeyRotationJob::job_store(&self.stores)
    }

    async fn apply(&self, job: EncryptionKeyRotationJob) -> Result<Outcome, ControllerError> {
        self.run_one_shot(job).await
    }
}
