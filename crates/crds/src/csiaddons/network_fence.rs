//! NetworkFence CRD
//!
//! Blocks (or unblocks) a set of client CIDRs from reaching the storage
//! backend. Cluster-scoped.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{Condition, OperationResult};
use crate::references::SecretReference;

/// Message recorded after a successful fence
pub const FENCE_SUCCESS_MESSAGE: &str = "fencing operation successful";

/// Message recorded after a successful unfence
pub const UNFENCE_SUCCESS_MESSAGE: &str = "unfencing operation successful";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csiaddons.openshift.io",
    version = "v1alpha1",
    kind = "NetworkFence",
    status = "NetworkFenceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFenceSpec {
    /// CSI driver name; taken from the class when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// Network blocks to fence
    pub cidrs: Vec<String>,

    /// Desired fence state
    pub fence_state: FenceState,

    /// Optional NetworkFenceClass supplying defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_fence_class_name: Option<String>,

    /// Secret passed to the agent; overrides the class secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretReference>,

    /// Inline parameters, overriding the class defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Desired fence state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum FenceState {
    /// Block the CIDRs
    Fenced,

    /// Allow the CIDRs again
    #[default]
    Unfenced,
}

impl FenceState {
    /// Status message for a successful transition into this state
    pub fn success_message(self) -> &'static str {
        match self {
            FenceState::Fenced => FENCE_SUCCESS_MESSAGE,
            FenceState::Unfenced => UNFENCE_SUCCESS_MESSAGE,
        }
    }

    /// Operation name used in logs and metrics
    pub fn operation(self) -> &'static str {
        match self {
            FenceState::Fenced => "fence",
            FenceState::Unfenced => "unfence",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFenceStatus {
    /// Result of the last call for `observedGeneration`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,

    /// Outcome message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation whose fence state the result belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// State last applied successfully; unset until the first success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_state: Option<FenceState>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NetworkFenceStatus {
    /// Result that is valid for `generation`.
    ///
    /// A result recorded for an earlier generation describes a fence state
    /// the operator has since replaced, so it is reported as absent.
    pub fn current_result(&self, generation: Option<i64>) -> Option<OperationResult> {
        if self.observed_generation == generation {
            self.result
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_messages_name_the_operation() {
        assert!(FenceState::Fenced.success_message().contains("fencing operation successful"));
        assert!(FenceState::Unfenced.success_message().starts_with("unfencing"));
    }

    #[test]
    fn test_result_from_older_generation_is_not_current() {
        let status = NetworkFenceStatus {
            result: Some(OperationResult::Succeeded),
            observed_generation: Some(1),
            ..Default::default()
        };
        assert_eq!(status.current_result(Some(1)), Some(OperationResult::Succeeded));
        assert_eq!(status.current_result(Some(2)), None);
    }
}
