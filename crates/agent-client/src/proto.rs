//! Protobuf messages for the `csiaddons.agent.v1` package
//!
//! Message layouts of the agent service. All calls are unary; `paths` holds
//! the fully-qualified method paths used on the wire.

#![allow(missing_docs, reason = "wire types mirror the protocol definition")]

use std::collections::HashMap;

/// Fully-qualified gRPC method paths
pub mod paths {
    pub const FENCE_CLUSTER_NETWORK: &str = "/csiaddons.agent.v1.Agent/FenceClusterNetwork";
    pub const UNFENCE_CLUSTER_NETWORK: &str = "/csiaddons.agent.v1.Agent/UnfenceClusterNetwork";
    pub const RECLAIM_SPACE: &str = "/csiaddons.agent.v1.Agent/ReclaimSpace";
    pub const ENCRYPTION_KEY_ROTATE: &str = "/csiaddons.agent.v1.Agent/EncryptionKeyRotate";
    pub const ENABLE_VOLUME_REPLICATION: &str = "/csiaddons.agent.v1.Agent/EnableVolumeReplication";
    pub const DISABLE_VOLUME_REPLICATION: &str =
        "/csiaddons.agent.v1.Agent/DisableVolumeReplication";
    pub const PROMOTE_VOLUME: &str = "/csiaddons.agent.v1.Agent/PromoteVolume";
    pub const DEMOTE_VOLUME: &str = "/csiaddons.agent.v1.Agent/DemoteVolume";
    pub const RESYNC_VOLUME: &str = "/csiaddons.agent.v1.Agent/ResyncVolume";
    pub const CREATE_VOLUME_GROUP: &str = "/csiaddons.agent.v1.Agent/CreateVolumeGroup";
    pub const ADD_VOLUME_TO_GROUP: &str = "/csiaddons.agent.v1.Agent/AddVolumeToGroup";
    pub const REMOVE_VOLUME_FROM_GROUP: &str = "/csiaddons.agent.v1.Agent/RemoveVolumeFromGroup";
    pub const DELETE_VOLUME_GROUP: &str = "/csiaddons.agent.v1.Agent/DeleteVolumeGroup";
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cidr {
    #[prost(string, tag = "1")]
    pub cidr: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FenceClusterNetworkRequest {
    #[prost(map = "string, string", tag = "1")]
    pub parameters: HashMap<String, String>,
    #[prost(string, tag = "2")]
    pub secret_name: String,
    #[prost(string, tag = "3")]
    pub secret_namespace: String,
    #[prost(message, repeated, tag = "4")]
    pub cidrs: Vec<Cidr>,
    #[prost(string, tag = "5")]
    pub driver: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FenceClusterNetworkResponse {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeOperationRequest {
    #[prost(string, tag = "1")]
    pub volume_id: String,
    #[prost(string, tag = "2")]
    pub secret_name: String,
    #[prost(string, tag = "3")]
    pub secret_namespace: String,
    #[prost(map = "string, string", tag = "4")]
    pub parameters: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeOperationResponse {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(int64, optional, tag = "2")]
    pub pre_usage_bytes: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub post_usage_bytes: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeSource {
    #[prost(string, tag = "1")]
    pub volume_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeGroupSource {
    #[prost(string, tag = "1")]
    pub volume_group_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicationSource {
    #[prost(oneof = "replication_source::Type", tags = "1, 2")]
    pub r#type: Option<replication_source::Type>,
}

pub mod replication_source {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Volume(super::VolumeSource),
        #[prost(message, tag = "2")]
        VolumeGroup(super::VolumeGroupSource),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicationRequest {
    #[prost(message, optional, tag = "1")]
    pub replication_source: Option<ReplicationSource>,
    #[prost(string, tag = "2")]
    pub replication_id: String,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(string, tag = "4")]
    pub secret_name: String,
    #[prost(string, tag = "5")]
    pub secret_namespace: String,
    #[prost(bool, tag = "6")]
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SyncState {
    Unknown = 0,
    Syncing = 1,
    Synced = 2,
    Degraded = 3,
    Resyncing = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicationResponse {
    #[prost(enumeration = "SyncState", tag = "1")]
    pub sync_state: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(int64, optional, tag = "3")]
    pub last_sync_time_unix: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVolumeGroupRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub volume_ids: Vec<String>,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(string, tag = "4")]
    pub secret_name: String,
    #[prost(string, tag = "5")]
    pub secret_namespace: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeGroupMemberRequest {
    #[prost(string, tag = "1")]
    pub volume_group_id: String,
    #[prost(string, tag = "2")]
    pub volume_id: String,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(string, tag = "4")]
    pub secret_name: String,
    #[prost(string, tag = "5")]
    pub secret_namespace: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeGroupResponse {
    #[prost(string, tag = "1")]
    pub volume_group_id: String,
    #[prost(string, repeated, tag = "2")]
    pub volume_ids: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolumeGroupRequest {
    #[prost(string, tag = "1")]
    pub volume_group_id: String,
    #[prost(string, tag = "2")]
    pub secret_name: String,
    #[prost(string, tag = "3")]
    pub secret_namespace: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolumeGroupResponse {}
