//! CSI-Addons CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed and produced by the
//! csi-addons controllers:
//! - Replication (`replication.storage.openshift.io`): VolumeReplication,
//!   VolumeGroupReplication and their classes, plus the derived
//!   VolumeGroupReplicationContent.
//! - Operations (`csiaddons.openshift.io`): NetworkFence, ReclaimSpace and
//!   EncryptionKeyRotation jobs and their cron variants.

pub mod common;
pub mod csiaddons;
pub mod references;
pub mod replication;
pub mod selector;

pub use common::*;
pub use csiaddons::*;
pub use references::*;
pub use replication::*;
pub use selector::*;

/// API group for replication resources.
pub const REPLICATION_GROUP: &str = "replication.storage.openshift.io";

/// API group for one-shot and fencing resources.
pub const CSIADDONS_GROUP: &str = "csiaddons.openshift.io";

/// API version shared by every resource in this crate.
pub const API_VERSION: &str = "v1alpha1";
