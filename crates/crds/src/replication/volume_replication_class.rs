//! VolumeReplicationClass CRD
//!
//! Cluster-scoped policy for single-volume replication: which driver performs
//! it and the default parameters passed to the agent.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeReplicationClass"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicationClassSpec {
    /// CSI driver name
    pub provisioner: String,

    /// Default parameters, overridable per intent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}
