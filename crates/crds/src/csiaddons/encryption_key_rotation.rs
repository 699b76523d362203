//! EncryptionKeyRotationJob and EncryptionKeyRotationCronJob CRDs
//!
//! A job asks the agent to rotate the encryption key of one claim's volume;
//! the cron variant emits such a job on every schedule tick.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::job::{
    ConcurrencyPolicy, CronJobStatus, OneShotStatus, default_backoff_limit,
    default_failed_jobs_history_limit, default_retry_deadline_seconds,
    default_successful_jobs_history_limit,
};
use crate::references::TargetSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "csiaddons.openshift.io",
    version = "v1alpha1",
    kind = "EncryptionKeyRotationJob",
    namespaced,
    status = "OneShotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyRotationJobSpec {
    /// Claim whose volume key is rotated
    pub target: TargetSpec,

    /// Attempts before the job is marked Failed
    #[serde(default = "default_backoff_limit")]
    pub back_off_limit: i32,

    /// Seconds after the first attempt at which retrying stops
    #[serde(default = "default_retry_deadline_seconds")]
    pub retry_deadline_seconds: i64,

    /// Per-call timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csiaddons.openshift.io",
    version = "v1alpha1",
    kind = "EncryptionKeyRotationCronJob",
    namespaced,
    status = "CronJobStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyRotationCronJobSpec {
    /// Cron expression (5-field, 6/7-field or `@hourly`-style macro)
    pub schedule: String,

    /// Template for emitted jobs
    pub job_template: EncryptionKeyRotationJobTemplateSpec,

    /// Stop emitting jobs
    #[serde(default)]
    pub suspend: bool,

    /// Behavior when a tick fires while a job is still running
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,

    /// Drop ticks missed by more than this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<i64>,

    /// Successful jobs to keep
    #[serde(default = "default_successful_jobs_history_limit")]
    pub successful_jobs_history_limit: i32,

    /// Failed jobs to keep
    #[serde(default = "default_failed_jobs_history_limit")]
    pub failed_jobs_history_limit: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyRotationJobTemplateSpec {
    /// Spec copied into each emitted job
    pub spec: EncryptionKeyRotationJobSpec,
}
