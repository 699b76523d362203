//! Replication CRDs
//!
//! Resources for volume replication:
//! - VolumeReplication and VolumeReplicationClass (single volume)
//! - VolumeGroupReplication and VolumeGroupReplicationClass (label-selected groups)
//! - VolumeGroupReplicationContent (derived, owned by a group intent)

pub mod volume_group_replication;
pub mod volume_group_replication_class;
pub mod volume_group_replication_content;
pub mod volume_replication;
pub mod volume_replication_class;

pub use volume_group_replication::*;
pub use volume_group_replication_class::*;
pub use volume_group_replication_content::*;
pub use volume_replication::*;
pub use volume_replication_class::*;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::Condition;

/// Condition types written on replication resources
pub mod condition_type {
    /// The last requested transition completed
    pub const COMPLETED: &str = "Completed";
    /// The backend reports the relationship as degraded
    pub const DEGRADED: &str = "Degraded";
    /// The backend reports a resync in progress
    pub const RESYNCING: &str = "Resyncing";
    /// Referenced class and volumes passed validation
    pub const VALIDATED: &str = "Validated";
}

/// Desired replication role, as written by the operator
///
/// Serializes lowercase ("primary", "secondary", "resync") and accepts the
/// capitalized spelling as well.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationState {
    /// Volume is the writable source
    #[default]
    #[serde(alias = "Primary")]
    Primary,

    /// Volume receives data from the peer
    #[serde(alias = "Secondary")]
    Secondary,

    /// Re-synchronize from the peer
    #[serde(alias = "Resync")]
    Resync,
}

/// Observed replication state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum State {
    /// Last successful transition made the volume primary
    Primary,

    /// Last successful transition made the volume secondary
    Secondary,

    /// Last successful transition requested a resync
    Resync,

    /// No transition has completed yet
    #[default]
    #[serde(alias = "unknown")]
    Unknown,
}

impl From<ReplicationState> for State {
    fn from(value: ReplicationState) -> Self {
        match value {
            ReplicationState::Primary => State::Primary,
            ReplicationState::Secondary => State::Secondary,
            ReplicationState::Resync => State::Resync,
        }
    }
}

/// Observed state shared by single and group replication intents
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    /// Observed replication state
    #[serde(default)]
    pub state: State,

    /// Human-readable summary of the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Set once the backend accepted the enable request
    #[serde(default)]
    pub replication_enabled: bool,

    /// Backend handle captured when the target was first resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_handle: Option<String>,

    /// CSI driver that owns the handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// Claim the handle was resolved from; this claim carries the protection
    /// finalizer until the intent is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    /// Start of the last transition attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_time: Option<DateTime<Utc>>,

    /// Completion of the last successful transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completion_time: Option<DateTime<Utc>>,

    /// Last sync time reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_state_accepts_both_spellings() {
        let lower: ReplicationState = serde_json::from_str("\"secondary\"").unwrap();
        let upper: ReplicationState = serde_json::from_str("\"Secondary\"").unwrap();
        assert_eq!(lower, ReplicationState::Secondary);
        assert_eq!(upper, ReplicationState::Secondary);
        assert_eq!(serde_json::to_string(&ReplicationState::Resync).unwrap(), "\"resync\"");
    }

    #[test]
    fn test_status_state_defaults_to_unknown() {
        let status: ReplicationStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.state, State::Unknown);
        assert!(!status.replication_enabled);
    }
}
