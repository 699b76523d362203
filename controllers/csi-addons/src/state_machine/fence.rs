//! Fencing lifecycle
//!
//! Every generation of a fence gets its desired state applied at least once.
//! A result is only trusted for the generation it was recorded at, so a spec
//! edit always produces a new call even when the previous result succeeded.

use crds::{
    Condition, ConditionStatus, FenceState, NetworkFenceStatus, OperationResult, condition_type, set_condition,
};

/// Next agent call for a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStep {
    /// Call fence or unfence
    Apply(FenceState),
    /// The current generation already succeeded
    InSync,
}

/// Picks the next call for the current generation
pub fn next_step(desired: FenceState, status: &NetworkFenceStatus, generation: Option<i64>) -> FenceStep {
    match status.current_result(generation) {
        Some(OperationResult::Succeeded) => FenceStep::InSync,
        _ => FenceStep::Apply(desired),
    }
}

/// Call needed before the fence can be released, if any
pub fn cleanup_step(status: &NetworkFenceStatus) -> Option<FenceState> {
    match status.applied_state {
        Some(FenceState::Fenced) => Some(FenceState::Unfenced),
        _ => None,
    }
}

/// Records a successful call
pub fn apply_success(status: &mut NetworkFenceStatus, applied: FenceState, generation: Option<i64>) {
    status.result = Some(OperationResult::Succeeded);
    status.message = Some(applied.success_message().to_string());
    status.observed_generation = generation;
    status.applied_state = Some(applied);
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::COMPLETED,
            ConditionStatus::True,
            match applied {
                FenceState::Fenced => "Fenced",
                FenceState::Unfenced => "Unfenced",
            },
            applied.success_message(),
        )
        .with_generation(generation),
    );
}

/// Drops a result that belongs to an earlier generation before the call for
/// `generation` is made. Returns false when there is nothing to drop.
pub fn apply_pending(status: &mut NetworkFenceStatus, desired: FenceState, generation: Option<i64>) -> bool {
    if status.result.is_none() || status.current_result(generation).is_some() {
        return false;
    }
    let operation = match desired {
        FenceState::Fenced => "fencing",
        FenceState::Unfenced => "unfencing",
    };
    status.result = None;
    status.message = Some(format!("{} operation in progress", operation));
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::Unknown, "InProgress", "")
            .with_generation(generation),
    );
    true
}

/// Records a failed call; the last applied state is kept
pub fn apply_failure(status: &mut NetworkFenceStatus, attempted: FenceState, error: &str, generation: Option<i64>) {
    let operation = match attempted {
        FenceState::Fenced => "fencing",
        FenceState::Unfenced => "unfencing",
    };
    let message = format!("{} operation failed: {}", operation, error);
    status.result = Some(OperationResult::Failed);
    status.observed_generation = generation;
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::False, "OperationFailed", &message)
            .with_generation(generation),
    );
    status.message = Some(message);
}

/// Records a fence that cannot be attempted until the operator fixes it
pub fn apply_invalid(status: &mut NetworkFenceStatus, message: &str, generation: Option<i64>) {
    status.result = Some(OperationResult::Failed);
    status.message = Some(message.to_string());
    status.observed_generation = generation;
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::VALIDATED, ConditionStatus::False, "InvalidSpec", message)
            .with_generation(generation),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fence_applies() {
        let status = NetworkFenceStatus::default();
        assert_eq!(next_step(FenceState::Fenced, &status, Some(1)), FenceStep::Apply(FenceState::Fenced));
    }

    #[test]
    fn test_success_is_valid_for_its_generation_only() {
        let mut status = NetworkFenceStatus::default();
        apply_success(&mut status, FenceState::Fenced, Some(1));

        assert_eq!(next_step(FenceState::Fenced, &status, Some(1)), FenceStep::InSync);
        assert_eq!(next_step(FenceState::Unfenced, &status, Some(2)), FenceStep::Apply(FenceState::Unfenced));
        assert!(status.message.as_deref().unwrap().contains("fencing operation successful"));
    }

    #[test]
    fn test_failure_retries_and_keeps_applied_state() {
        let mut status = NetworkFenceStatus::default();
        apply_success(&mut status, FenceState::Fenced, Some(1));
        apply_failure(&mut status, FenceState::Unfenced, "agent unavailable", Some(2));

        assert_eq!(status.result, Some(OperationResult::Failed));
        assert_eq!(status.applied_state, Some(FenceState::Fenced));
        assert_eq!(next_step(FenceState::Unfenced, &status, Some(2)), FenceStep::Apply(FenceState::Unfenced));
        assert!(status.message.as_deref().unwrap().starts_with("unfencing operation failed"));
    }

    #[test]
    fn test_spec_edit_drops_previous_result() {
        let mut status = NetworkFenceStatus::default();
        assert!(!apply_pending(&mut status, FenceState::Fenced, Some(1)));

        apply_success(&mut status, FenceState::Fenced, Some(1));
        assert!(!apply_pending(&mut status, FenceState::Fenced, Some(1)));

        assert!(apply_pending(&mut status, FenceState::Unfenced, Some(2)));
        assert_eq!(status.result, None);
        assert_eq!(status.applied_state, Some(FenceState::Fenced));
        assert_eq!(status.message.as_deref(), Some("unfencing operation in progress"));
        assert!(!apply_pending(&mut status, FenceState::Unfenced, Some(2)));
    }

    #[test]
    fn test_cleanup_unfences_only_when_fenced() {
        let mut status = NetworkFenceStatus::default();
        assert_eq!(cleanup_step(&status), None);

        apply_success(&mut status, FenceState::Fenced, Some(1));
        assert_eq!(cleanup_step(&status), Some(FenceState::Unfenced));

        apply_success(&mut status, FenceState::Unfenced, Some(2));
        assert_eq!(cleanup_step(&status), None);
    }
}
