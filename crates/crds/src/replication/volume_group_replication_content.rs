//! VolumeGroupReplicationContent CRD
//!
//! Cluster-scoped record of the backend side of a group intent: the group
//! handle and the volume handles currently in the group. Owned by exactly
//! one VolumeGroupReplication and removed during that intent's deletion.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::NameReference;

/// Label carrying the owning intent's name
pub const OWNER_NAME_LABEL: &str = "replication.storage.openshift.io/vgr-name";

/// Label carrying the owning intent's namespace
pub const OWNER_NAMESPACE_LABEL: &str = "replication.storage.openshift.io/vgr-namespace";

/// Annotation naming the owning intent as `namespace/name`
pub const OWNER_ANNOTATION: &str = "replication.storage.openshift.io/volume-group-replication";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeGroupReplicationContent",
    status = "VolumeGroupReplicationContentStatus",
    shortname = "vgrcontent"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationContentSpec {
    /// Owning group intent
    pub volume_group_replication_ref: GroupReplicationReference,

    /// CSI driver name
    pub provisioner: String,

    /// Class the group was created with
    pub volume_group_replication_class_name: String,

    /// Backend-assigned group handle, empty until the group is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_replication_handle: Option<String>,

    /// Backend volumes currently in the group
    #[serde(default)]
    pub source: VolumeGroupReplicationContentSource,
}

/// Reference to the owning intent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupReplicationReference {
    /// Intent name
    pub name: String,

    /// Intent namespace
    pub namespace: String,

    /// Intent UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationContentSource {
    /// Volume handles in the group, sorted
    #[serde(default)]
    pub volume_handles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationContentStatus {
    /// PersistentVolumes backing the recorded handles
    #[serde(default)]
    pub persistent_volume_ref_list: Vec<NameReference>,
}
