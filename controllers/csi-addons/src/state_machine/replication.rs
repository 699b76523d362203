//! Replication lifecycle
//!
//! Observed state only moves as the result of a successful agent call for
//! the matching transition. The first step of every relationship is
//! `Enable`; after that, a desired state equal to the observed one issues no
//! call at all, with two backend-driven exceptions: a resync still reported
//! in progress is polled again, and a degraded secondary with `autoResync`
//! set is resynced.

use agent_client::{ReplicationResponse, SyncState};
use chrono::{DateTime, Utc};
use crds::{
    Condition, ConditionStatus, ReplicationState, ReplicationStatus, State, condition_type, is_condition_true,
    set_condition,
};

/// Next agent call for a replication intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStep {
    /// Enable replication on the volume or group
    Enable,
    /// Make the volume primary
    Promote,
    /// Make the volume secondary
    Demote,
    /// Resynchronize from the peer
    Resync,
    /// Stop replicating (deletion only)
    Disable,
    /// Observed state matches the spec
    InSync,
}

impl ReplicationStep {
    /// Operation name, as used in logs and metrics
    pub fn operation(self) -> &'static str {
        match self {
            ReplicationStep::Enable => "enable_replication",
            ReplicationStep::Promote => "promote",
            ReplicationStep::Demote => "demote",
            ReplicationStep::Resync => "resync",
            ReplicationStep::Disable => "disable_replication",
            ReplicationStep::InSync => "none",
        }
    }

    fn success_reason(self) -> &'static str {
        match self {
            ReplicationStep::Enable => "Enabled",
            ReplicationStep::Promote => "Promoted",
            ReplicationStep::Demote => "Demoted",
            ReplicationStep::Disable => "Disabled",
            ReplicationStep::Resync | ReplicationStep::InSync => "Resynced",
        }
    }

    fn failure_reason(self) -> &'static str {
        match self {
            ReplicationStep::Enable => "FailedToEnable",
            ReplicationStep::Promote => "FailedToPromote",
            ReplicationStep::Demote => "FailedToDemote",
            ReplicationStep::Disable => "FailedToDisable",
            ReplicationStep::Resync | ReplicationStep::InSync => "FailedToResync",
        }
    }
}

/// Picks the next call for `desired` given the observed status
pub fn next_step(desired: ReplicationState, auto_resync: bool, status: &ReplicationStatus) -> ReplicationStep {
    if !status.replication_enabled {
        return ReplicationStep::Enable;
    }

    match (desired, status.state) {
        (ReplicationState::Primary, State::Primary) => ReplicationStep::InSync,
        (ReplicationState::Primary, _) => ReplicationStep::Promote,
        (ReplicationState::Secondary, State::Secondary) => {
            if auto_resync && is_condition_true(&status.conditions, condition_type::DEGRADED) {
                ReplicationStep::Resync
            } else {
                ReplicationStep::InSync
            }
        }
        (ReplicationState::Secondary, _) => ReplicationStep::Demote,
        (ReplicationState::Resync, State::Resync) => {
            if is_condition_true(&status.conditions, condition_type::RESYNCING) {
                ReplicationStep::Resync
            } else {
                ReplicationStep::InSync
            }
        }
        (ReplicationState::Resync, _) => ReplicationStep::Resync,
    }
}

fn success_message(step: ReplicationStep, desired: ReplicationState) -> &'static str {
    match (step, desired) {
        (ReplicationStep::Enable, _) => "replication enabled",
        (ReplicationStep::Disable, _) => "replication disabled",
        (ReplicationStep::Promote, _) => "volume is marked primary",
        (ReplicationStep::Demote, _) => "volume is marked secondary",
        (ReplicationStep::Resync, _) | (ReplicationStep::InSync, ReplicationState::Resync) => {
            "volume is resyncing"
        }
        (ReplicationStep::InSync, ReplicationState::Primary) => "volume is marked primary",
        (ReplicationStep::InSync, ReplicationState::Secondary) => "volume is marked secondary",
    }
}

fn record_sync_state(status: &mut ReplicationStatus, response: &ReplicationResponse, generation: Option<i64>) {
    let message = response.message.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::DEGRADED,
            ConditionStatus::from_bool(response.sync_state == SyncState::Degraded),
            if response.sync_state == SyncState::Degraded { "Degraded" } else { "Healthy" },
            if response.sync_state == SyncState::Degraded { message.clone() } else { String::new() },
        )
        .with_generation(generation),
    );
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::RESYNCING,
            ConditionStatus::from_bool(response.sync_state == SyncState::Resyncing),
            if response.sync_state == SyncState::Resyncing { "Resyncing" } else { "NotResyncing" },
            if response.sync_state == SyncState::Resyncing { message } else { String::new() },
        )
        .with_generation(generation),
    );
    if let Some(last_sync_time) = response.last_sync_time {
        status.last_sync_time = Some(last_sync_time);
    }
}

/// Records a successful call of `step`
pub fn apply_success(
    status: &mut ReplicationStatus,
    step: ReplicationStep,
    desired: ReplicationState,
    response: &ReplicationResponse,
    generation: Option<i64>,
    now: DateTime<Utc>,
) {
    match step {
        ReplicationStep::Enable => status.replication_enabled = true,
        ReplicationStep::Disable => status.replication_enabled = false,
        ReplicationStep::Promote => status.state = State::Primary,
        ReplicationStep::Demote => status.state = State::Secondary,
        // A resync keeps the declared intent visible; the backend progress
        // lives in the Resyncing condition
        ReplicationStep::Resync => status.state = State::from(desired),
        ReplicationStep::InSync => {}
    }

    // Enable and disable bracket the relationship; they are not transitions
    // the operator asked for
    if !matches!(step, ReplicationStep::Enable | ReplicationStep::Disable) {
        set_condition(
            &mut status.conditions,
            Condition::new(
                condition_type::COMPLETED,
                ConditionStatus::True,
                step.success_reason(),
                success_message(step, desired),
            )
            .with_generation(generation),
        );
        status.observed_generation = generation;
        status.last_completion_time = Some(now);
        record_sync_state(status, response, generation);
    }
    status.message = Some(success_message(step, desired).to_string());
}

/// Records a pass that needed no call.
///
/// A spec edit that lands back on the observed state still counts as a
/// completed transition, so a failure recorded for an abandoned transition
/// does not outlive the generation it was reported for.
pub fn apply_in_sync(status: &mut ReplicationStatus, desired: ReplicationState, generation: Option<i64>) {
    if status.observed_generation == generation {
        return;
    }
    let reason = match desired {
        ReplicationState::Primary => ReplicationStep::Promote.success_reason(),
        ReplicationState::Secondary => ReplicationStep::Demote.success_reason(),
        ReplicationState::Resync => ReplicationStep::Resync.success_reason(),
    };
    let message = success_message(ReplicationStep::InSync, desired);
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::True, reason, message).with_generation(generation),
    );
    status.message = Some(message.to_string());
    status.observed_generation = generation;
}

/// Records a failed call of `step`; the observed state is left as it was
pub fn apply_failure(status: &mut ReplicationStatus, step: ReplicationStep, error: &str, generation: Option<i64>) {
    let message = format!("{} failed: {}", step.operation(), error);
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::COMPLETED, ConditionStatus::False, step.failure_reason(), &message)
            .with_generation(generation),
    );
    status.message = Some(message);
}

/// Marks the intent as blocked on something the operator has to fix
pub fn apply_invalid(status: &mut ReplicationStatus, reason: &str, message: &str, generation: Option<i64>) {
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::VALIDATED, ConditionStatus::False, reason, message)
            .with_generation(generation),
    );
    status.message = Some(message.to_string());
}

/// Marks validation as passed
pub fn apply_valid(status: &mut ReplicationStatus, generation: Option<i64>) {
    set_condition(
        &mut status.conditions,
        Condition::new(condition_type::VALIDATED, ConditionStatus::True, "PrerequisiteMet", "")
            .with_generation(generation),
    );
}
