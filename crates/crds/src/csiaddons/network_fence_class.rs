//! NetworkFenceClass CRD
//!
//! Cluster-scoped defaults for network fences. Two reserved parameter keys
//! carry the secret reference and are never forwarded to the agent.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Class parameter naming the fencing secret
pub const FENCE_SECRET_NAME_PARAMETER: &str = "csiaddons.openshift.io/networkfence-secret-name";

/// Class parameter naming the fencing secret's namespace
pub const FENCE_SECRET_NAMESPACE_PARAMETER: &str =
    "csiaddons.openshift.io/networkfence-secret-namespace";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csiaddons.openshift.io",
    version = "v1alpha1",
    kind = "NetworkFenceClass"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFenceClassSpec {
    /// CSI driver name
    pub provisioner: String,

    /// Default parameters, including the reserved secret keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}
