//! Unit tests for ReclaimSpaceJob and EncryptionKeyRotationJob reconciler

#[cfg(test)]
mod tests {
    use crate::driver::Requeue;
    use crate::test_utils::*;
    use agent_client::{AgentError, Code};
    use cluster_store::ResourceStore;
    use crds::{EncryptionKeyRotationJob, OneShotStatus, OperationResult, ReclaimSpaceJob};

    async fn setup() -> Harness {
        let harness = Harness::new();
        harness.add_bound_claim("data", "vol-1", &[]).await;
        harness
    }

    async fn reclaim_status(harness: &Harness, name: &str) -> OneShotStatus {
        harness
            .reclaim_space_jobs
            .get(Some(NAMESPACE), name)
            .await
            .unwrap()
            .unwrap()
            .status
            .unwrap_or_default()
    }

    async fn drive_reclaim(harness: &Harness, name: &str) -> Requeue {
        harness.reconciler.drive::<ReclaimSpaceJob>(Some(NAMESPACE), name).await
    }

    #[tokio::test]
    async fn test_reclaim_space_succeeds() {
        let harness = setup().await;
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-data", "data"))
            .await
            .unwrap();

        let requeue = drive_reclaim(&harness, "reclaim-data").await;

        assert_eq!(requeue, Requeue::AwaitChange);
        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, Some(OperationResult::Succeeded));
        assert_eq!(
            status.message.as_deref(),
            Some("space reclamation operation successfully completed")
        );
        assert_eq!(status.retries, 0);
        assert!(status.start_time.is_some());
        assert!(status.completion_time.is_some());
        assert_eq!(harness.agent.calls_of("reclaim_space"), 1);
    }

    #[tokio::test]
    async fn test_key_rotation_succeeds() {
        let harness = setup().await;
        harness
            .encryption_key_rotation_jobs
            .create(&create_test_key_rotation_job("rotate-data", "data"))
            .await
            .unwrap();

        harness
            .reconciler
            .drive::<EncryptionKeyRotationJob>(Some(NAMESPACE), "rotate-data")
            .await;

        let job = harness
            .encryption_key_rotation_jobs
            .get(Some(NAMESPACE), "rotate-data")
            .await
            .unwrap()
            .unwrap();
        let status = job.status.unwrap();
        assert_eq!(status.result, Some(OperationResult::Succeeded));
        assert_eq!(
            status.message.as_deref(),
            Some("encryption key rotation operation successfully completed")
        );
        assert_eq!(harness.agent.calls_of("rotate_key"), 1);
    }

    #[tokio::test]
    async fn test_missing_claim_fails_without_calls() {
        let harness = setup().await;
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-ghost", "ghost"))
            .await
            .unwrap();

        let requeue = drive_reclaim(&harness, "reclaim-ghost").await;

        assert_eq!(requeue, Requeue::AwaitChange);
        let status = reclaim_status(&harness, "reclaim-ghost").await;
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert_eq!(status.message.as_deref(), Some("PersistentVolumeClaim ghost not found"));
        assert_eq!(harness.agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_volume_fails_after_one_call() {
        let harness = setup().await;
        harness.agent.mark_volume_missing("vol-1");
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-data", "data"))
            .await
            .unwrap();

        drive_reclaim(&harness, "reclaim-data").await;
        drive_reclaim(&harness, "reclaim-data").await;

        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert!(status.message.unwrap().contains("not found"));
        assert_eq!(harness.agent.calls_of("reclaim_space"), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let harness = setup().await;
        harness
            .agent
            .fail_next("reclaim_space", AgentError::status(Code::Unavailable, "agent busy"));
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-data", "data"))
            .await
            .unwrap();

        let requeue = drive_reclaim(&harness, "reclaim-data").await;

        assert!(matches!(requeue, Requeue::After(d) if !d.is_zero()));
        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, None);
        assert_eq!(status.retries, 1);

        drive_reclaim(&harness, "reclaim-data").await;
        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, Some(OperationResult::Succeeded));
        assert_eq!(status.retries, 1);
        assert_eq!(harness.agent.calls_of("reclaim_space"), 2);
    }

    #[tokio::test]
    async fn test_pending_claim_counts_as_attempt() {
        let harness = Harness::new();
        harness.claims.create(&pending_claim("data")).await.unwrap();
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-data", "data"))
            .await
            .unwrap();

        let requeue = drive_reclaim(&harness, "reclaim-data").await;

        assert!(matches!(requeue, Requeue::After(d) if !d.is_zero()));
        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, None);
        assert_eq!(status.retries, 1);
        assert!(status.message.unwrap().contains("is not bound"));
        assert_eq!(harness.agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backoff_limit_fails_job() {
        let harness = setup().await;
        for _ in 0..2 {
            harness
                .agent
                .fail_next("reclaim_space", AgentError::status(Code::Unavailable, "agent busy"));
        }
        let mut job = create_test_reclaim_space_job("reclaim-data", "data");
        job.spec.back_off_limit = 2;
        harness.reclaim_space_jobs.create(&job).await.unwrap();

        drive_reclaim(&harness, "reclaim-data").await;
        let requeue = drive_reclaim(&harness, "reclaim-data").await;

        assert_eq!(requeue, Requeue::AwaitChange);
        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert_eq!(status.retries, 2);
        assert!(status.message.unwrap().starts_with("backoff limit reached"));
    }

    #[tokio::test]
    async fn test_retry_deadline_fails_job() {
        let harness = setup().await;
        harness
            .agent
            .fail_next("reclaim_space", AgentError::status(Code::Unavailable, "agent busy"));
        let mut job = create_test_reclaim_space_job("reclaim-data", "data");
        job.spec.retry_deadline_seconds = 30;
        harness.reclaim_space_jobs.create(&job).await.unwrap();

        drive_reclaim(&harness, "reclaim-data").await;
        harness.clock.advance(chrono::Duration::seconds(31));
        drive_reclaim(&harness, "reclaim-data").await;

        let status = reclaim_status(&harness, "reclaim-data").await;
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert!(status.message.unwrap().starts_with("retry deadline exceeded"));
        assert_eq!(harness.agent.calls_of("reclaim_space"), 1);
    }

    #[tokio::test]
    async fn test_terminal_job_is_never_rerun() {
        let harness = setup().await;
        harness
            .reclaim_space_jobs
            .create(&create_test_reclaim_space_job("reclaim-data", "data"))
            .await
            .unwrap();
        drive_reclaim(&harness, "reclaim-data").await;
        let before = harness
            .reclaim_space_jobs
            .get(Some(NAMESPACE), "reclaim-data")
            .await
            .unwrap()
            .unwrap();

        for _ in 0..3 {
            assert_eq!(drive_reclaim(&harness, "reclaim-data").await, Requeue::AwaitChange);
        }

        let after = harness
            .reclaim_space_jobs
            .get(Some(NAMESPACE), "reclaim-data")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(harness.agent.calls_of("reclaim_space"), 1);
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }
}
