//! VolumeReplication CRD
//!
//! Declares the desired replication role of a single claim-backed volume.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ReplicationState, ReplicationStatus};
use crate::references::TypedLocalObjectReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeReplication",
    namespaced,
    status = "ReplicationStatus",
    shortname = "vr"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicationSpec {
    /// Name of the VolumeReplicationClass
    pub volume_replication_class: String,

    /// Desired replication role
    pub replication_state: ReplicationState,

    /// Volume to replicate (a PersistentVolumeClaim in the same namespace)
    pub data_source: TypedLocalObjectReference,

    /// Let the backend resync automatically after a split brain
    #[serde(default)]
    pub auto_resync: bool,

    /// Inline parameters, overriding the class defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}
