//! Request and response models for agent operations
//!
//! These are the caller-facing shapes; `client.rs` maps them onto the
//! protobuf messages in `proto.rs`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Secret the agent resolves for credentials
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

/// Fence or unfence request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FenceRequest {
    /// CSI driver that owns the CIDRs
    pub driver: String,
    /// Network blocks
    pub cidrs: Vec<String>,
    /// Credentials
    pub secret: Option<SecretRef>,
    /// Merged class and inline parameters
    pub parameters: BTreeMap<String, String>,
}

/// Request targeting one volume (space reclamation, key rotation)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeRequest {
    /// CSI driver that owns the volume
    pub driver: String,
    /// Backend volume handle
    pub volume_handle: String,
    /// Credentials
    pub secret: Option<SecretRef>,
    /// Extra parameters
    pub parameters: BTreeMap<String, String>,
}

/// Outcome of a fence or volume operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationResponse {
    /// Message reported by the agent
    pub message: Option<String>,
    /// Bytes in use before the operation, when reported
    pub pre_usage_bytes: Option<i64>,
    /// Bytes in use after the operation, when reported
    pub post_usage_bytes: Option<i64>,
}

/// What a replication call acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationSource {
    /// A single volume handle
    Volume(String),
    /// A backend volume group handle
    Group(String),
}

impl ReplicationSource {
    /// The handle, whichever kind it is
    pub fn handle(&self) -> &str {
        match self {
            ReplicationSource::Volume(handle) | ReplicationSource::Group(handle) => handle,
        }
    }
}

/// Enable, disable, promote, demote or resync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// CSI driver that owns the source
    pub driver: String,
    /// Volume or group
    pub source: ReplicationSource,
    /// Stable identifier of the replication relationship
    pub replication_id: String,
    /// Merged class and inline parameters
    pub parameters: BTreeMap<String, String>,
    /// Credentials
    pub secret: Option<SecretRef>,
    /// Force promotion when the peer is unreachable
    pub force: bool,
}

/// Sync state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Not reported
    #[default]
    Unknown,
    /// Initial or incremental sync running
    Syncing,
    /// Peer is up to date
    Synced,
    /// Relationship is degraded
    Degraded,
    /// Resync in progress
    Resyncing,
}

/// Outcome of a replication call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicationResponse {
    /// Sync state after the call
    pub sync_state: SyncState,
    /// Message reported by the agent
    pub message: Option<String>,
    /// Last successful sync, when reported
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Create a backend volume group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateGroupRequest {
    /// CSI driver
    pub driver: String,
    /// Group name, stable across retries
    pub name: String,
    /// Initial members
    pub volume_handles: Vec<String>,
    /// Merged class and inline parameters
    pub parameters: BTreeMap<String, String>,
    /// Credentials
    pub secret: Option<SecretRef>,
}

/// Add one volume to, or remove one volume from, a group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupMemberRequest {
    /// CSI driver
    pub driver: String,
    /// Backend group handle
    pub group_handle: String,
    /// Member volume handle
    pub volume_handle: String,
    /// Merged class and inline parameters
    pub parameters: BTreeMap<String, String>,
    /// Credentials
    pub secret: Option<SecretRef>,
}

/// Delete a backend group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteGroupRequest {
    /// CSI driver
    pub driver: String,
    /// Backend group handle
    pub group_handle: String,
    /// Credentials
    pub secret: Option<SecretRef>,
}

/// Group state after a group call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupResponse {
    /// Backend group handle
    pub group_handle: String,
    /// Members after the call
    pub volume_handles: Vec<String>,
}
