//! Unit tests for NetworkFence reconciler

#[cfg(test)]
mod tests {
    use crate::driver::Requeue;
    use crate::finalizer::{NETWORK_FENCE_FINALIZER, has_finalizer};
    use crate::test_utils::*;
    use agent_client::{AgentError, Code};
    use cluster_store::ResourceStore;
    use crds::{ConditionStatus, FenceState, NetworkFence, OperationResult, condition_type, find_condition};

    const CIDR: &str = "10.90.89.66/32";

    async fn set_fence_state(harness: &Harness, state: FenceState) {
        let mut fence = harness.network_fence("fence-node-a").await;
        fence.spec.fence_state = state;
        harness.network_fences.replace(&fence).await.unwrap();
    }

    #[tokio::test]
    async fn test_fence_unfence_cycles() {
        let harness = Harness::new();
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced))
            .await
            .unwrap();

        for _ in 0..3 {
            set_fence_state(&harness, FenceState::Fenced).await;
            harness.converge::<NetworkFence>(None, "fence-node-a").await;
            let status = harness.network_fence("fence-node-a").await.status.unwrap();
            assert_eq!(status.result, Some(OperationResult::Succeeded));
            assert_eq!(status.message.as_deref(), Some("fencing operation successful"));
            assert!(harness.agent.fenced_cidrs().contains(CIDR));

            set_fence_state(&harness, FenceState::Unfenced).await;
            harness.converge::<NetworkFence>(None, "fence-node-a").await;
            let status = harness.network_fence("fence-node-a").await.status.unwrap();
            assert_eq!(status.result, Some(OperationResult::Succeeded));
            assert_eq!(status.message.as_deref(), Some("unfencing operation successful"));
            assert!(harness.agent.fenced_cidrs().is_empty());
        }

        assert_eq!(harness.agent.calls_of("fence"), 3);
        assert_eq!(harness.agent.calls_of("unfence"), 3);
    }

    #[tokio::test]
    async fn test_succeeded_generation_is_not_repeated() {
        let harness = Harness::new();
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced))
            .await
            .unwrap();

        for _ in 0..3 {
            harness.converge::<NetworkFence>(None, "fence-node-a").await;
        }

        assert_eq!(harness.agent.calls_of("fence"), 1);
        let fence = harness.network_fence("fence-node-a").await;
        assert!(has_finalizer(&fence, NETWORK_FENCE_FINALIZER));
        assert_eq!(fence.status.unwrap().observed_generation, fence.metadata.generation);
    }

    #[tokio::test]
    async fn test_failed_fence_is_retried() {
        let harness = Harness::new();
        harness
            .agent
            .fail_next("fence", AgentError::status(Code::Unavailable, "agent unreachable"));
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced))
            .await
            .unwrap();

        let requeue = harness.converge::<NetworkFence>(None, "fence-node-a").await;

        assert!(matches!(requeue, Requeue::After(d) if !d.is_zero()));
        let status = harness.network_fence("fence-node-a").await.status.unwrap();
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert!(status.message.unwrap().starts_with("fencing operation failed"));
        assert_eq!(status.applied_state, None);

        harness.converge::<NetworkFence>(None, "fence-node-a").await;
        let status = harness.network_fence("fence-node-a").await.status.unwrap();
        assert_eq!(status.result, Some(OperationResult::Succeeded));
        assert!(harness.agent.fenced_cidrs().contains(CIDR));
    }

    #[tokio::test]
    async fn test_driver_from_class() {
        let harness = Harness::new();
        harness
            .network_fence_classes
            .create(&create_test_network_fence_class("fence-class"))
            .await
            .unwrap();
        let mut fence = create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced);
        fence.spec.driver = None;
        fence.spec.network_fence_class_name = Some("fence-class".to_string());
        harness.network_fences.create(&fence).await.unwrap();

        harness.converge::<NetworkFence>(None, "fence-node-a").await;

        let status = harness.network_fence("fence-node-a").await.status.unwrap();
        assert_eq!(status.result, Some(OperationResult::Succeeded));
    }

    #[tokio::test]
    async fn test_missing_class_blocks() {
        let harness = Harness::new();
        let mut fence = create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced);
        fence.spec.network_fence_class_name = Some("missing".to_string());
        harness.network_fences.create(&fence).await.unwrap();

        harness.converge::<NetworkFence>(None, "fence-node-a").await;

        let status = harness.network_fence("fence-node-a").await.status.unwrap();
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert!(status.message.unwrap().contains("missing"));
        assert_eq!(harness.agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_deleting_fenced_fence_unfences_first() {
        let harness = Harness::new();
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced))
            .await
            .unwrap();
        harness.converge::<NetworkFence>(None, "fence-node-a").await;

        harness.network_fences.delete(None, "fence-node-a").await.unwrap();
        let requeue = harness.converge::<NetworkFence>(None, "fence-node-a").await;

        assert_eq!(requeue, Requeue::AwaitChange);
        assert_eq!(harness.agent.calls_of("unfence"), 1);
        assert!(harness.agent.fenced_cidrs().is_empty());
        assert!(!harness.network_fences.contains(None, "fence-node-a"));
    }

    #[tokio::test]
    async fn test_deleting_unfenced_fence_makes_no_call() {
        let harness = Harness::new();
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Unfenced))
            .await
            .unwrap();
        harness.converge::<NetworkFence>(None, "fence-node-a").await;
        let calls = harness.agent.call_count();

        harness.network_fences.delete(None, "fence-node-a").await.unwrap();
        harness.converge::<NetworkFence>(None, "fence-node-a").await;

        assert_eq!(harness.agent.call_count(), calls);
        assert!(!harness.network_fences.contains(None, "fence-node-a"));
    }

    #[tokio::test]
    async fn test_spec_edit_never_reports_previous_result() {
        let harness = Harness::new();
        harness
            .network_fences
            .create(&create_test_network_fence("fence-node-a", &[CIDR], FenceState::Fenced))
            .await
            .unwrap();
        harness.converge::<NetworkFence>(None, "fence-node-a").await;
        harness
            .agent
            .fail_next("unfence", AgentError::status(Code::Unavailable, "agent unreachable"));

        set_fence_state(&harness, FenceState::Unfenced).await;
        harness.reconciler.drive::<NetworkFence>(None, "fence-node-a").await;

        let fence = harness.network_fence("fence-node-a").await;
        let status = fence.status.unwrap();
        assert_eq!(status.observed_generation, fence.metadata.generation);
        assert_eq!(status.result, Some(OperationResult::Failed));
        assert_eq!(status.applied_state, Some(FenceState::Fenced));
        assert!(status.message.unwrap().starts_with("unfencing operation failed"));
        let completed = find_condition(&status.conditions, condition_type::COMPLETED).unwrap();
        assert_eq!(completed.status, ConditionStatus::False);
        assert!(harness.agent.fenced_cidrs().contains(CIDR));
    }
}
