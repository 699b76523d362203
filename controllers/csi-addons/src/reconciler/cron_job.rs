//! ReclaimSpaceCronJob and EncryptionKeyRotationCronJob reconciler
//!
//! Each pass looks for the most recent schedule tick since the last emitted
//! job and emits at most one job for it. Job names embed the tick, so a
//! repeated pass for the same tick finds the job it already created instead
//! of emitting a second one.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use cluster_store::{ResourceStore, StoreError, object_key};
use crds::{
    ConcurrencyPolicy, Condition, ConditionStatus, CronJobStatus, EncryptionKeyRotationCronJob,
    EncryptionKeyRotationJob, JobReference, OperationResult, ReclaimSpaceCronJob, ReclaimSpaceJob, condition_type,
    set_condition,
};

use crate::driver::{Outcome, Reconcile};
use crate::error::ControllerError;
use crate::reconciler::one_shot::OneShotJob;
use crate::reconciler::{Reconciler, Stores, creation_time};

const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// Access to the fields every cron parent kind shares
pub(crate) trait ScheduledJob: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    type Job: OneShotJob;

    fn cron_store(stores: &Stores) -> &dyn ResourceStore<Self>;
    fn schedule(&self) -> &str;
    fn suspend(&self) -> bool;
    fn concurrency_policy(&self) -> ConcurrencyPolicy;
    fn starting_deadline_seconds(&self) -> Option<i64>;
    /// Successful and failed jobs to keep
    fn history_limits(&self) -> (i32, i32);
    fn cron_status(&self) -> Option<&CronJobStatus>;
    fn set_cron_status(&mut self, status: CronJobStatus);
    /// Job for one tick, built from the template
    fn new_job(&self, name: &str, owner: OwnerReference) -> Self::Job;
}

impl ScheduledJob for ReclaimSpaceCronJob {
    type Job = ReclaimSpaceJob;

    fn cron_store(stores: &Stores) -> &dyn ResourceStore<Self> {
        stores.reclaim_space_cron_jobs.as_ref()
    }

    fn schedule(&self) -> &str {
        &self.spec.schedule
    }

    fn suspend(&self) -> bool {
        self.spec.suspend
    }

    fn concurrency_policy(&self) -> ConcurrencyPolicy {
        self.spec.concurrency_policy
    }

    fn starting_deadline_seconds(&self) -> Option<i64> {
        self.spec.starting_deadline_seconds
    }

    fn history_limits(&self) -> (i32, i32) {
        (
            self.spec.successful_jobs_history_limit,
            self.spec.failed_jobs_history_limit,
        )
    }

    fn cron_status(&self) -> Option<&CronJobStatus> {
        self.status.as_ref()
    }

    fn set_cron_status(&mut self, status: CronJobStatus) {
        self.status = Some(status);
    }

    fn new_job(&self, name: &str, owner: OwnerReference) -> ReclaimSpaceJob {
        let mut job = ReclaimSpaceJob::new(name, self.spec.job_template.spec.clone());
        job.metadata.namespace = self.namespace();
        job.metadata.owner_references = Some(vec![owner]);
        job
    }
}

impl ScheduledJob for EncryptionKeyRotationCronJob {
    type Job = EncryptionKeyRotationJob;

    fn cron_store(stores: &Stores) -> &dyn ResourceStore<Self> {
        stores.encryption_key_rotation_cron_jobs.as_ref()
    }

    fn schedule(&self) -> &str {
        &self.spec.schedule
    }

    fn suspend(&self) -> bool {
        self.spec.suspend
    }

    fn concurrency_policy(&self) -> ConcurrencyPolicy {
        self.spec.concurrency_policy
    }

    fn starting_deadline_seconds(&self) -> Option<i64> {
        self.spec.starting_deadline_seconds
    }

    fn history_limits(&self) -> (i32, i32) {
        (
            self.spec.successful_jobs_history_limit,
            self.spec.failed_jobs_history_limit,
        )
    }

    fn cron_status(&self) -> Option<&CronJobStatus> {
        self.status.as_ref()
    }

    fn set_cron_status(&mut self, status: CronJobStatus) {
        self.status = Some(status);
    }

    fn new_job(&self, name: &str, owner: OwnerReference) -> EncryptionKeyRotationJob {
        let mut job = EncryptionKeyRotationJob::new(name, self.spec.job_template.spec.clone());
        job.metadata.namespace = self.namespace();
        job.metadata.owner_references = Some(vec![owner]);
        job
    }
}

/// Parses a schedule expression.
///
/// Standard 5-field expressions get a leading seconds field; 6/7-field
/// expressions and `@hourly`-style macros are passed through.
pub fn parse_schedule(expression: &str) -> Result<Schedule, String> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err("schedule is empty".to_string());
    }
    let normalized = if !expression.starts_with('@') && expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| format!("invalid schedule {:?}: {}", expression, e))
}

/// Most recent tick in `(since, now]`.
///
/// Walks backwards from just past `now`, so the cost does not grow with the
/// number of ticks missed since `since`.
pub fn latest_tick(schedule: &Schedule, since: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&(now + chrono::Duration::seconds(1)))
        .rev()
        .find(|tick| *tick <= now)
        .filter(|tick| *tick > since)
}

/// Name of the job emitted for `tick`
pub fn job_name(parent: &str, tick: DateTime<Utc>) -> String {
    format!("{}-{}", parent, tick.timestamp())
}

fn owned_by<J: Resource, P: Resource>(job: &J, parent: &P) -> bool {
    let Some(uid) = parent.uid() else {
        return false;
    };
    job.owner_references().iter().any(|r| r.uid == uid)
}

fn job_result<J: OneShotJob>(job: &J) -> Option<OperationResult> {
    job.job_status().and_then(|s| s.result)
}

fn completion_time<J: OneShotJob>(job: &J) -> Option<DateTime<Utc>> {
    job.job_status().and_then(|s| s.completion_time)
}

/// Terminal jobs beyond the history limits, oldest first
fn jobs_to_prune<J: OneShotJob>(jobs: &[J], active: Option<&str>, successful: i32, failed: i32) -> Vec<String> {
    let mut prune = Vec::new();
    for (result, limit) in [(OperationResult::Succeeded, successful), (OperationResult::Failed, failed)] {
        let mut finished: Vec<&J> = jobs
            .iter()
            .filter(|job| job_result(*job) == Some(result))
            .filter(|job| active != Some(job.name_any().as_str()))
            .collect();
        // Newest first
        finished.sort_by_key(|job| std::cmp::Reverse(completion_time(*job)));
        prune.extend(finished.into_iter().skip(limit.max(0) as usize).map(|job| job.name_any()));
    }
    prune
}

impl Reconciler {
    async fn write_cron_status<P: ScheduledJob>(&self, parent: &P, status: CronJobStatus) -> Result<(), ControllerError> {
        if parent.cron_status() == Some(&status) {
            return Ok(());
        }
        let mut updated = parent.clone();
        updated.set_cron_status(status);
        P::cron_store(&self.stores).replace_status(&updated).await?;
        Ok(())
    }

    /// Creates the job for one tick; a job left by an earlier pass is reused
    async fn emit_job<P: ScheduledJob>(&self, parent: &P, tick: DateTime<Utc>) -> Result<P::Job, ControllerError> {
        let owner = parent.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidResource(format!("{} has no uid yet", object_key(parent)))
        })?;
        let name = job_name(&parent.name_any(), tick);
        let job = parent.new_job(&name, owner);
        let store = <P::Job as OneShotJob>::job_store(&self.stores);
        match store.create(&job).await {
            Ok(created) => {
                info!("{} {}: emitted {} for tick {}", P::kind(&()), object_key(parent), name, tick);
                Ok(created)
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!("{} already exists for tick {}", name, tick);
                store
                    .get(parent.namespace().as_deref(), &name)
                    .await?
                    .ok_or_else(|| ControllerError::Store(StoreError::NotFound(name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One pass over a cron parent
    pub(crate) async fn run_schedule<P: ScheduledJob>(&self, parent: P) -> Result<Outcome, ControllerError> {
        let key = object_key(&parent);
        let namespace = parent.namespace();
        let generation = parent.meta().generation;
        let now = self.now();
        let mut status = parent.cron_status().cloned().unwrap_or_default();

        let schedule = match parse_schedule(parent.schedule()) {
            Ok(schedule) => schedule,
            Err(message) => {
                warn!("{} {} blocked: {}", P::kind(&()), key, message);
                set_condition(
                    &mut status.conditions,
                    Condition::new(condition_type::VALIDATED, ConditionStatus::False, "InvalidSchedule", message)
                        .with_generation(generation),
                );
                self.write_cron_status(&parent, status).await?;
                return Ok(Outcome::Blocked);
            }
        };
        set_condition(
            &mut status.conditions,
            Condition::new(condition_type::VALIDATED, ConditionStatus::True, "ScheduleValid", "")
                .with_generation(generation),
        );

        let store = <P::Job as OneShotJob>::job_store(&self.stores);
        let jobs: Vec<P::Job> = store
            .list(namespace.as_deref())
            .await?
            .into_iter()
            .filter(|job| owned_by(job, &parent))
            .collect();

        // Clear the active reference once its job is gone or finished
        let mut running = false;
        if let Some(active) = status.active.clone() {
            match jobs.iter().find(|job| job.name_any() == active.name) {
                None => status.active = None,
                Some(job) => match job_result(job) {
                    Some(result) => {
                        if result == OperationResult::Succeeded {
                            status.last_successful_time = status.last_successful_time.max(completion_time(job));
                        }
                        status.active = None;
                    }
                    None => running = true,
                },
            }
        }

        let (successful, failed) = parent.history_limits();
        for name in jobs_to_prune(&jobs, status.active.as_ref().map(|a| a.name.as_str()), successful, failed) {
            debug!("{} {}: pruning {}", P::kind(&()), key, name);
            store.delete(namespace.as_deref(), &name).await?;
        }

        if parent.suspend() {
            self.write_cron_status(&parent, status).await?;
            return Ok(Outcome::Synced);
        }

        let since = status
            .last_schedule_time
            .or_else(|| creation_time(&parent))
            .unwrap_or(now);
        if let Some(tick) = latest_tick(&schedule, since, now) {
            let stale = parent
                .starting_deadline_seconds()
                .is_some_and(|deadline| now.signed_duration_since(tick) > chrono::Duration::seconds(deadline));
            let emit = if stale {
                info!("{} {}: tick {} missed its starting deadline", P::kind(&()), key, tick);
                false
            } else if running {
                match parent.concurrency_policy() {
                    ConcurrencyPolicy::Forbid => {
                        info!("{} {}: skipping tick {}, previous job still running", P::kind(&()), key, tick);
                        false
                    }
                    ConcurrencyPolicy::Replace => {
                        if let Some(active) = status.active.take() {
                            info!("{} {}: replacing running job {}", P::kind(&()), key, active.name);
                            store.delete(namespace.as_deref(), &active.name).await?;
                        }
                        true
                    }
                }
            } else {
                true
            };

            if emit {
                let job = self.emit_job(&parent, tick).await?;
                status.active = Some(JobReference {
                    name: job.name_any(),
                    uid: job.uid(),
                });
                status.last_schedule_time = status.last_schedule_time.max(Some(tick));
            }
        }

        self.write_cron_status(&parent, status).await?;

        let until_next = schedule
            .after(&now)
            .next()
            .and_then(|next| next.signed_duration_since(now).to_std().ok())
            .unwrap_or(self.config.resync_interval);
        Ok(Outcome::RequeueAfter(
            until_next.min(self.config.resync_interval).max(MIN_REQUEUE),
        ))
    }
}

#[async_trait::async_trait]
impl Reconcile<ReclaimSpaceCronJob> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<ReclaimSpaceCronJob> {
        ReclaimSpaceCronJob::cron_store(&self.stores)
    }

    async fn apply(&self, parent: ReclaimSpaceCronJob) -> Result<Outcome, ControllerError> {
        self.run_schedule(parent).await
    }
}

#[async_trait::async_trait]
impl Reconcile<EncryptionKeyRotationCronJob> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<EncryptionKeyRotationCronJob> {
        EncryptionKeyRotationCronJob::cron_store(&self.stores)
    }

    async fn apply(&self, parent: EncryptionKeyRotationCronJob) -> Result<Outcome, ControllerError> {
        self.run_schedule(parent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_schedule_gets_seconds() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let next = schedule.after(&start).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn test_macro_schedule() {
        let schedule = parse_schedule("@hourly").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(
            schedule.after(&start).next().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(parse_schedule("").is_err());
        assert!(parse_schedule("every minute please").is_err());
    }

    #[test]
    fn test_missed_ticks_collapse_to_latest() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 10).unwrap();
        assert_eq!(
            latest_tick(&schedule, since, now),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap())
        );
        assert_eq!(latest_tick(&schedule, now, now), None);
    }

    #[test]
    fn test_long_outage_still_picks_latest_tick() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 30).unwrap();
        assert_eq!(
            latest_tick(&schedule, since, now),
            Some(Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_tick_at_now_counts() {
        let schedule = parse_schedule("@hourly").unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(latest_tick(&schedule, since, now), Some(now));
        assert_eq!(latest_tick(&schedule, now, now), None);
    }

    #[test]
    fn test_job_name_embeds_tick() {
        let tick = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(job_name("nightly", tick), "nightly-1704067200");
    }
}
