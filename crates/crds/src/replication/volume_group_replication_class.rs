//! VolumeGroupReplicationClass CRD

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.storage.openshift.io",
    version = "v1alpha1",
    kind = "VolumeGroupReplicationClass"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupReplicationClassSpec {
    /// CSI driver name
    pub provisioner: String,

    /// Default group parameters, overridable per intent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}
