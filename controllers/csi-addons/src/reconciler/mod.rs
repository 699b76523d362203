//! Reconciliation logic for CSI-Addons CRDs.
//!
//! This module is organized by resource family:
//! - `volume_replication`: VolumeReplication
//! - `volume_group_replication`: VolumeGroupReplication and its content
//! - `network_fence`: NetworkFence
//! - `one_shot`: ReclaimSpaceJob and EncryptionKeyRotationJob
//! - `cron_job`: ReclaimSpaceCronJob and EncryptionKeyRotationCronJob

pub mod cron_job;
#[cfg(test)]
mod cron_job_test;
pub mod network_fence;
#[cfg(test)]
mod network_fence_test;
pub mod one_shot;
#[cfg(test)]
mod one_shot_test;
pub mod volume_group_replication;
pub mod volume_replication;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use agent_client::{AgentClientTrait, SecretRef};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::{Resource, ResourceExt};
use tokio::sync::Mutex;

use cluster_store::ResourceStore;
use crds::{
    EncryptionKeyRotationCronJob, EncryptionKeyRotationJob, NetworkFence, NetworkFenceClass, ReclaimSpaceCronJob,
    ReclaimSpaceJob, ReplicationStatus, VolumeGroupReplication, VolumeGroupReplicationClass,
    VolumeGroupReplicationContent, VolumeReplication, VolumeReplicationClass, condition_type, is_condition_true,
};

use crate::backoff::FibonacciBackoff;
use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::driver::Outcome;
use crate::error::ControllerError;
use crate::membership::{BoundVolume, ClaimSnapshot};
use crate::metrics::Metrics;
use crate::state_machine::replication::ReplicationStep;

/// Class parameter naming the replication secret
pub const REPLICATION_SECRET_NAME_PARAMETER: &str = "replication.storage.openshift.io/replication-secret-name";

/// Class parameter naming the replication secret's namespace
pub const REPLICATION_SECRET_NAMESPACE_PARAMETER: &str =
    "replication.storage.openshift.io/replication-secret-namespace";

/// Class parameter naming the group replication secret
pub const GROUP_SECRET_NAME_PARAMETER: &str = "replication.storage.openshift.io/group-replication-secret-name";

/// Class parameter naming the group replication secret's namespace
pub const GROUP_SECRET_NAMESPACE_PARAMETER: &str =
    "replication.storage.openshift.io/group-replication-secret-namespace";

const CLAIM_PHASE_BOUND: &str = "Bound";

/// Poll interval while the backend reports a resync in progress
pub const RESYNC_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Requeue after a successful replication call: enable chains straight into
/// the first transition, a running resync is polled
pub(crate) fn replication_outcome(step: ReplicationStep, status: &ReplicationStatus) -> Outcome {
    if step == ReplicationStep::Enable {
        Outcome::Continue
    } else if is_condition_true(&status.conditions, condition_type::RESYNCING) {
        Outcome::RequeueAfter(RESYNC_POLL_INTERVAL)
    } else {
        Outcome::Synced
    }
}

/// Store handles for every kind the controller reads or writes
#[derive(Clone)]
pub struct Stores {
    pub volume_replications: Arc<dyn ResourceStore<VolumeReplication>>,
    pub volume_replication_classes: Arc<dyn ResourceStore<VolumeReplicationClass>>,
    pub volume_group_replications: Arc<dyn ResourceStore<VolumeGroupReplication>>,
    pub volume_group_replication_classes: Arc<dyn ResourceStore<VolumeGroupReplicationClass>>,
    pub volume_group_replication_contents: Arc<dyn ResourceStore<VolumeGroupReplicationContent>>,
    pub network_fences: Arc<dyn ResourceStore<NetworkFence>>,
    pub network_fence_classes: Arc<dyn ResourceStore<NetworkFenceClass>>,
    pub reclaim_space_jobs: Arc<dyn ResourceStore<ReclaimSpaceJob>>,
    pub reclaim_space_cron_jobs: Arc<dyn ResourceStore<ReclaimSpaceCronJob>>,
    pub encryption_key_rotation_jobs: Arc<dyn ResourceStore<EncryptionKeyRotationJob>>,
    pub encryption_key_rotation_cron_jobs: Arc<dyn ResourceStore<EncryptionKeyRotationCronJob>>,
    pub claims: Arc<dyn ResourceStore<PersistentVolumeClaim>>,
    pub volumes: Arc<dyn ResourceStore<PersistentVolume>>,
}

/// How a claim maps onto a backend volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimBinding {
    /// The claim does not exist
    Missing,
    /// The claim is not bound yet
    Unbound,
    /// The bound volume is not provisioned by a CSI driver
    NoCsiVolume,
    /// The claim is bound to a CSI volume
    Bound(BoundVolume),
}

/// Reconciles CSI-Addons resources.
pub struct Reconciler {
    pub(crate) stores: Stores,
    pub(crate) agent: Arc<dyn AgentClientTrait>,
    pub(crate) config: ControllerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<Metrics>,
    /// Requeue backoff per resource (kind/namespace/name)
    pub(crate) backoff_states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        stores: Stores,
        agent: Arc<dyn AgentClientTrait>,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            stores,
            agent,
            config,
            clock,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Follows a claim to its CSI volume
    pub(crate) async fn resolve_claim(&self, namespace: Option<&str>, name: &str) -> Result<ClaimBinding, ControllerError> {
        let Some(claim) = self.stores.claims.get(namespace, name).await? else {
            return Ok(ClaimBinding::Missing);
        };
        let Some(pv_name) = bound_volume_name(&claim) else {
            return Ok(ClaimBinding::Unbound);
        };
        let Some(volume) = self.stores.volumes.get(None, &pv_name).await? else {
            return Ok(ClaimBinding::Unbound);
        };
        Ok(match csi_volume(&volume) {
            Some(bound) => ClaimBinding::Bound(bound),
            None => ClaimBinding::NoCsiVolume,
        })
    }

    /// Snapshot of every claim in `namespace` with its backend volume
    pub(crate) async fn claim_inventory(&self, namespace: Option<&str>) -> Result<Vec<ClaimSnapshot>, ControllerError> {
        let claims = self.stores.claims.list(namespace).await?;
        let volumes: BTreeMap<String, BoundVolume> = self
            .stores
            .volumes
            .list(None)
            .await?
            .iter()
            .filter_map(|pv| csi_volume(pv).map(|bound| (pv.name_any(), bound)))
            .collect();

        Ok(claims
            .iter()
            .map(|claim| ClaimSnapshot {
                name: claim.name_any(),
                labels: claim.labels().clone(),
                volume: bound_volume_name(claim).and_then(|pv| volumes.get(&pv).cloned()),
            })
            .collect())
    }
}

fn bound_volume_name(claim: &PersistentVolumeClaim) -> Option<String> {
    let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
    if phase != Some(CLAIM_PHASE_BOUND) {
        return None;
    }
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.clone())
        .filter(|name| !name.is_empty())
}

fn csi_volume(volume: &PersistentVolume) -> Option<BoundVolume> {
    let csi = volume.spec.as_ref()?.csi.as_ref()?;
    Some(BoundVolume {
        volume_handle: csi.volume_handle.clone(),
        driver: csi.driver.clone(),
        pv_name: volume.name_any(),
    })
}

/// Removes the reserved secret keys from `parameters` and returns the secret they name
pub(crate) fn split_secret(
    parameters: &mut BTreeMap<String, String>,
    name_key: &str,
    namespace_key: &str,
) -> Option<SecretRef> {
    let name = parameters.remove(name_key);
    let namespace = parameters.remove(namespace_key);
    match (name, namespace) {
        (Some(name), namespace) if !name.is_empty() => Some(SecretRef {
            name,
            namespace: namespace.unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Stable identifier of the relationship an intent owns
pub(crate) fn replication_id<K: Resource>(object: &K) -> String {
    object.uid().unwrap_or_else(|| object.name_any())
}

/// Creation time of an object
///
/// Goes through the serialized form so it does not depend on the time type
/// k8s-openapi uses for `metav1.Time`.
pub(crate) fn creation_time<K: Resource>(object: &K) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(object.meta().creation_timestamp.as_ref()?).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_secret_strips_reserved_keys() {
        let mut parameters = BTreeMap::from([
            (REPLICATION_SECRET_NAME_PARAMETER.to_string(), "rbd-secret".to_string()),
            (REPLICATION_SECRET_NAMESPACE_PARAMETER.to_string(), "rook-ceph".to_string()),
            ("mirroringMode".to_string(), "snapshot".to_string()),
        ]);
        let secret = split_secret(
            &mut parameters,
            REPLICATION_SECRET_NAME_PARAMETER,
            REPLICATION_SECRET_NAMESPACE_PARAMETER,
        );

        assert_eq!(
            secret,
            Some(SecretRef {
                name: "rbd-secret".to_string(),
                namespace: "rook-ceph".to_string(),
            })
        );
        assert_eq!(parameters.len(), 1);
        assert!(parameters.contains_key("mirroringMode"));
    }

    #[test]
    fn test_split_secret_without_name() {
        let mut parameters = BTreeMap::from([(REPLICATION_SECRET_NAMESPACE_PARAMETER.to_string(), "ns".to_string())]);
        assert_eq!(
            split_secret(
                &mut parameters,
                REPLICATION_SECRET_NAME_PARAMETER,
                REPLICATION_SECRET_NAMESPACE_PARAMETER
            ),
            None
        );
        assert!(parameters.is_empty());
    }
}
