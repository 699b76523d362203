//! Unit tests for ReclaimSpaceCronJob and EncryptionKeyRotationCronJob reconciler

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::clock::Clock;
    use crate::driver::Requeue;
    use crate::test_utils::*;
    use cluster_store::ResourceStore;
    use crds::{
        ConcurrencyPolicy, ConditionStatus, CronJobStatus, EncryptionKeyRotationCronJob, EncryptionKeyRotationJob,
        ReclaimSpaceCronJob, ReclaimSpaceJob, condition_type, find_condition,
    };
    use kube::ResourceExt;

    const EVERY_MINUTE: &str = "* * * * *";

    async fn setup(cron_job: ReclaimSpaceCronJob) -> Harness {
        let harness = Harness::new();
        harness.add_bound_claim("data", "vol-1", &[]).await;
        harness.reclaim_space_cron_jobs.create(&cron_job).await.unwrap();
        harness
    }

    async fn tick(harness: &Harness) -> Requeue {
        harness.clock.advance(chrono::Duration::seconds(61));
        harness
            .reconciler
            .drive::<ReclaimSpaceCronJob>(Some(NAMESPACE), "nightly")
            .await
    }

    async fn cron_status(harness: &Harness) -> CronJobStatus {
        harness
            .reclaim_space_cron_jobs
            .get(Some(NAMESPACE), "nightly")
            .await
            .unwrap()
            .unwrap()
            .status
            .unwrap_or_default()
    }

    async fn jobs(harness: &Harness) -> Vec<String> {
        let mut names: Vec<String> = harness
            .reclaim_space_jobs
            .list(Some(NAMESPACE))
            .await
            .unwrap()
            .iter()
            .map(|job| job.name_any())
            .collect();
        names.sort();
        names
    }

    async fn finish_active(harness: &Harness) {
        let active = cron_status(harness).await.active.unwrap();
        harness
            .reconciler
            .drive::<ReclaimSpaceJob>(Some(NAMESPACE), &active.name)
            .await;
    }

    #[tokio::test]
    async fn test_no_job_before_first_tick() {
        let harness = setup(create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data")).await;

        let requeue = harness
            .reconciler
            .drive::<ReclaimSpaceCronJob>(Some(NAMESPACE), "nightly")
            .await;

        assert!(matches!(requeue, Requeue::After(d) if d >= Duration::from_secs(1) && d <= Duration::from_secs(60)));
        assert!(jobs(&harness).await.is_empty());
        let status = cron_status(&harness).await;
        let validated = find_condition(&status.conditions, condition_type::VALIDATED).unwrap();
        assert_eq!(validated.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_one_job_per_tick() {
        let harness = setup(create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data")).await;

        tick(&harness).await;

        let status = cron_status(&harness).await;
        let first_tick = status.last_schedule_time.unwrap();
        let active = status.active.unwrap();
        assert_eq!(active.name, format!("nightly-{}", first_tick.timestamp()));
        assert_eq!(jobs(&harness).await, vec![active.name.clone()]);

        let job = harness
            .reclaim_space_jobs
            .get(Some(NAMESPACE), &active.name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.spec.target.persistent_volume_claim, "data");
        assert_eq!(job.owner_references().len(), 1);
        assert_eq!(active.uid, job.uid());

        // A repeated pass at the same time emits nothing new
        harness
            .reconciler
            .drive::<ReclaimSpaceCronJob>(Some(NAMESPACE), "nightly")
            .await;
        assert_eq!(jobs(&harness).await.len(), 1);

        finish_active(&harness).await;
        tick(&harness).await;

        let status = cron_status(&harness).await;
        assert!(status.last_schedule_time.unwrap() > first_tick);
        assert!(status.last_successful_time.is_some());
        assert_eq!(jobs(&harness).await.len(), 2);
        assert_eq!(harness.agent.calls_of("reclaim_space"), 1);
    }

    #[tokio::test]
    async fn test_long_outage_emits_latest_tick_only() {
        let harness = setup(create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data")).await;

        harness.clock.advance(chrono::Duration::days(8));
        harness
            .reconciler
            .drive::<ReclaimSpaceCronJob>(Some(NAMESPACE), "nightly")
            .await;

        let now = harness.clock.now();
        let tick = cron_status(&harness).await.last_schedule_time.unwrap();
        assert!(tick <= now);
        assert!(now - tick < chrono::Duration::minutes(1));
        assert_eq!(jobs(&harness).await, vec![format!("nightly-{}", tick.timestamp())]);
    }

    #[tokio::test]
    async fn test_forbid_skips_while_job_runs() {
        let harness = setup(create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data")).await;
        tick(&harness).await;
        let before = cron_status(&harness).await;

        tick(&harness).await;

        let after = cron_status(&harness).await;
        assert_eq!(jobs(&harness).await.len(), 1);
        assert_eq!(after.active, before.active);
        assert_eq!(after.last_schedule_time, before.last_schedule_time);
    }

    #[tokio::test]
    async fn test_replace_deletes_running_job() {
        let mut cron_job = create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data");
        cron_job.spec.concurrency_policy = ConcurrencyPolicy::Replace;
        let harness = setup(cron_job).await;
        tick(&harness).await;
        let first = cron_status(&harness).await.active.unwrap();

        tick(&harness).await;

        let second = cron_status(&harness).await.active.unwrap();
        assert_ne!(first.name, second.name);
        assert_eq!(jobs(&harness).await, vec![second.name]);
    }

    #[tokio::test]
    async fn test_suspended_schedule_emits_nothing() {
        let mut cron_job = create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data");
        cron_job.spec.suspend = true;
        let harness = setup(cron_job).await;

        tick(&harness).await;
        tick(&harness).await;

        assert!(jobs(&harness).await.is_empty());
        assert_eq!(cron_status(&harness).await.active, None);
    }

    #[tokio::test]
    async fn test_invalid_schedule_blocks() {
        let harness = setup(create_test_reclaim_space_cron_job("nightly", "not a schedule", "data")).await;

        let requeue = tick(&harness).await;

        assert!(matches!(requeue, Requeue::After(d) if !d.is_zero()));
        assert!(jobs(&harness).await.is_empty());
        let status = cron_status(&harness).await;
        let validated = find_condition(&status.conditions, condition_type::VALIDATED).unwrap();
        assert_eq!(validated.status, ConditionStatus::False);
        assert_eq!(validated.reason, "InvalidSchedule");
    }

    #[tokio::test]
    async fn test_history_is_pruned() {
        let mut cron_job = create_test_reclaim_space_cron_job("nightly", EVERY_MINUTE, "data");
        cron_job.spec.successful_jobs_history_limit = 1;
        let harness = setup(cron_job).await;

        tick(&harness).await;
        let first = cron_status(&harness).await.active.unwrap().name;
        finish_active(&harness).await;
        tick(&harness).await;
        let second = cron_status(&harness).await.active.unwrap().name;
        finish_active(&harness).await;
        tick(&harness).await;
        let third = cron_status(&harness).await.active.unwrap().name;

        let remaining = jobs(&harness).await;
        assert!(!remaining.contains(&first));
        assert!(remaining.contains(&second));
        assert!(remaining.contains(&third));
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_key_rotation_schedule_emits_rotation_job() {
        let harness = Harness::new();
        harness.add_bound_claim("data", "vol-1", &[]).await;
        harness
            .encryption_key_rotation_cron_jobs
            .create(&create_test_key_rotation_cron_job("rotate", EVERY_MINUTE, "data"))
            .await
            .unwrap();

        harness.clock.advance(chrono::Duration::seconds(61));
        harness
            .reconciler
            .drive::<EncryptionKeyRotationCronJob>(Some(NAMESPACE), "rotate")
            .await;

        let jobs = harness
            .encryption_key_rotation_jobs
            .list(Some(NAMESPACE))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        let name = jobs[0].name_any();
        assert!(name.starts_with("rotate-"));

        harness
            .reconciler
            .drive::<EncryptionKeyRotationJob>(Some(NAMESPACE), &name)
            .await;
        assert_eq!(harness.agent.calls_of("rotate_key"), 1);
    }
}
