//! VolumeGroupReplication CRD
//!
//! Declares the desired replication role of every bound claim matching a
//! label selector. Membership is resolved on each reconcile and recorded in
//! the derived VolumeGroupReplicationContent.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ReplicationState, ReplicationStatus};
use crate::references::NameReference;
use crate::selector::LabelSelector;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeGroupReplication",
    namespaced,
    status = "VolumeGroupReplicationStatus",
    shortname = "vgr"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationSpec {
    /// Name of the VolumeGroupReplicationClass
    pub volume_group_replication_class_name: String,

    /// Name of the VolumeReplicationClass used for the group relationship
    pub volume_replication_class_name: String,

    /// Desired replication role for the whole group
    pub replication_state: ReplicationState,

    /// Claims to include in the group
    pub source: VolumeGroupReplicationSource,

    /// Name of the derived content, set by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_replication_content_name: Option<String>,

    /// Inline parameters, overriding the class defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Source of group members
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationSource {
    /// Label selector evaluated against claims in the intent's namespace
    #[serde(default)]
    pub selector: LabelSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationStatus {
    /// Replication state of the group relationship
    #[serde(flatten)]
    pub replication: ReplicationStatus,

    /// Claims currently recorded as group members
    #[serde(default)]
    pub persistent_volume_claims_ref_list: Vec<NameReference>,
}
