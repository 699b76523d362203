//! Object references shared across CSI-Addons CRDs
//!
//! Follows the Kubernetes reference patterns: `TypedLocalObjectReference`
//! for replication data sources, `SecretReference` for agent credentials and
//! plain name references for status lists.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of claim accepted as a replication data source
pub const PERSISTENT_VOLUME_CLAIM_KIND: &str = "PersistentVolumeClaim";

/// Typed reference to an object in the same namespace
///
/// Mirrors `TypedLocalObjectReference`: the referenced object must live in the
/// namespace of the referencing resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    /// API group of the referenced resource (empty for the core group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// Kind of the referenced resource (e.g., "PersistentVolumeClaim")
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,
}

impl TypedLocalObjectReference {
    /// Reference to a claim in the same namespace
    pub fn persistent_volume_claim(name: impl Into<String>) -> Self {
        Self {
            api_group: None,
            kind: PERSISTENT_VOLUME_CLAIM_KIND.to_string(),
            name: name.into(),
        }
    }

    /// Returns true when this reference points at a claim
    pub fn is_persistent_volume_claim(&self) -> bool {
        self.kind == PERSISTENT_VOLUME_CLAIM_KIND
            && self.api_group.as_deref().is_none_or(str::is_empty)
    }
}

/// Reference to a Secret holding agent credentials
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,

    /// Secret namespace
    pub namespace: String,
}

impl SecretReference {
    /// Returns true when both name and namespace are empty
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.namespace.is_empty()
    }
}

/// Name-only reference used in status lists
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NameReference {
    /// Referenced object name
    pub name: String,
}

impl NameReference {
    /// Creates a reference
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Target volume of a one-shot operation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Name of the PersistentVolumeClaim in the job's namespace
    #[serde(default)]
    pub persistent_volume_claim: String,
}

/// Reference to a job emitted by a cron resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    /// Job name
    pub name: String,

    /// Job UID at creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}
