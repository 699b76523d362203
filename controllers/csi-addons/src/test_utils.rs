//! Test utilities for unit testing reconcilers
//!
//! `Harness` wires a `Reconciler` to one in-memory store per kind, the mock
//! agent and a manual clock. The builders below create the objects the
//! reconciler tests share.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agent_client::MockAgentClient;
use cluster_store::{MemoryStore, ResourceStore};
use crds::*;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::clock::ManualClock;
use crate::config::ControllerConfig;
use crate::driver::{Reconcile, Requeue};
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, Stores};

/// Driver used by every test volume and class
pub const DRIVER: &str = "rbd.csi.ceph.com";

/// Namespace used by namespaced test objects
pub const NAMESPACE: &str = "default";

/// Passes `converge` runs before giving up
const MAX_PASSES: usize = 20;

/// Reconciler wired to in-memory stores and the mock agent
pub struct Harness {
    pub volume_replications: MemoryStore<VolumeReplication>,
    pub volume_replication_classes: MemoryStore<VolumeReplicationClass>,
    pub volume_group_replications: MemoryStore<VolumeGroupReplication>,
    pub volume_group_replication_classes: MemoryStore<VolumeGroupReplicationClass>,
    pub volume_group_replication_contents: MemoryStore<VolumeGroupReplicationContent>,
    pub network_fences: MemoryStore<NetworkFence>,
    pub network_fence_classes: MemoryStore<NetworkFenceClass>,
    pub reclaim_space_jobs: MemoryStore<ReclaimSpaceJob>,
    pub reclaim_space_cron_jobs: MemoryStore<ReclaimSpaceCronJob>,
    pub encryption_key_rotation_jobs: MemoryStore<EncryptionKeyRotationJob>,
    pub encryption_key_rotation_cron_jobs: MemoryStore<EncryptionKeyRotationCronJob>,
    pub claims: MemoryStore<PersistentVolumeClaim>,
    pub volumes: MemoryStore<PersistentVolume>,
    pub agent: MockAgentClient,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<Metrics>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        let volume_replications = MemoryStore::<VolumeReplication>::new();
        let volume_replication_classes = MemoryStore::<VolumeReplicationClass>::new();
        let volume_group_replications = MemoryStore::<VolumeGroupReplication>::new();
        let volume_group_replication_classes = MemoryStore::<VolumeGroupReplicationClass>::new();
        let volume_group_replication_contents = MemoryStore::<VolumeGroupReplicationContent>::new();
        let network_fences = MemoryStore::<NetworkFence>::new();
        let network_fence_classes = MemoryStore::<NetworkFenceClass>::new();
        let reclaim_space_jobs = MemoryStore::<ReclaimSpaceJob>::new();
        let reclaim_space_cron_jobs = MemoryStore::<ReclaimSpaceCronJob>::new();
        let encryption_key_rotation_jobs = MemoryStore::<EncryptionKeyRotationJob>::new();
        let encryption_key_rotation_cron_jobs = MemoryStore::<EncryptionKeyRotationCronJob>::new();
        let claims = MemoryStore::<PersistentVolumeClaim>::new();
        let volumes = MemoryStore::<PersistentVolume>::new();

        let stores = Stores {
            volume_replications: Arc::new(volume_replications.clone()),
            volume_replication_classes: Arc::new(volume_replication_classes.clone()),
            volume_group_replications: Arc::new(volume_group_replications.clone()),
            volume_group_replication_classes: Arc::new(volume_group_replication_classes.clone()),
            volume_group_replication_contents: Arc::new(volume_group_replication_contents.clone()),
            network_fences: Arc::new(network_fences.clone()),
            network_fence_classes: Arc::new(network_fence_classes.clone()),
            reclaim_space_jobs: Arc::new(reclaim_space_jobs.clone()),
            reclaim_space_cron_jobs: Arc::new(reclaim_space_cron_jobs.clone()),
            encryption_key_rotation_jobs: Arc::new(encryption_key_rotation_jobs.clone()),
            encryption_key_rotation_cron_jobs: Arc::new(encryption_key_rotation_cron_jobs.clone()),
            claims: Arc::new(claims.clone()),
            volumes: Arc::new(volumes.clone()),
        };
        let agent = MockAgentClient::new();
        let clock = Arc::new(ManualClock::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let reconciler = Reconciler::new(
            stores,
            Arc::new(agent.clone()),
            ControllerConfig::default(),
            clock.clone(),
            metrics.clone(),
        );

        Self {
            volume_replications,
            volume_replication_classes,
            volume_group_replications,
            volume_group_replication_classes,
            volume_group_replication_contents,
            network_fences,
            network_fence_classes,
            reclaim_space_jobs,
            reclaim_space_cron_jobs,
            encryption_key_rotation_jobs,
            encryption_key_rotation_cron_jobs,
            claims,
            volumes,
            agent,
            clock,
            metrics,
            reconciler,
        }
    }

    /// Runs passes until the driver asks for a delayed or change-driven requeue
    pub async fn converge<K>(&self, namespace: Option<&str>, name: &str) -> Requeue
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
        Reconciler: Reconcile<K>,
    {
        let mut requeue = Requeue::After(Duration::ZERO);
        for _ in 0..MAX_PASSES {
            requeue = self.reconciler.drive::<K>(namespace, name).await;
            if requeue != Requeue::After(Duration::ZERO) {
                return requeue;
            }
        }
        requeue
    }

    /// Creates a claim bound to a CSI volume with `handle`
    pub async fn add_bound_claim(&self, name: &str, handle: &str, labels: &[(&str, &str)]) {
        let pv_name = format!("pv-{}", name);
        self.volumes.create(&csi_volume(&pv_name, handle)).await.unwrap();
        self.claims
            .create(&bound_claim(name, &pv_name, labels))
            .await
            .unwrap();
    }

    /// Replaces the labels of an existing claim
    pub async fn relabel_claim(&self, name: &str, labels: &[(&str, &str)]) {
        let mut claim = self.claims.get(Some(NAMESPACE), name).await.unwrap().unwrap();
        claim.metadata.labels = Some(label_map(labels));
        self.claims.replace(&claim).await.unwrap();
    }

    pub async fn volume_replication(&self, name: &str) -> VolumeReplication {
        self.volume_replications.get(Some(NAMESPACE), name).await.unwrap().unwrap()
    }

    pub async fn volume_group_replication(&self, name: &str) -> VolumeGroupReplication {
        self.volume_group_replications
            .get(Some(NAMESPACE), name)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn network_fence(&self, name: &str) -> NetworkFence {
        self.network_fences.get(None, name).await.unwrap().unwrap()
    }

    pub async fn claim(&self, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims.get(Some(NAMESPACE), name).await.unwrap()
    }
}

fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn namespaced(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// Claim in phase Bound pointing at `volume_name`
pub fn bound_claim(name: &str, volume_name: &str, labels: &[(&str, &str)]) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            labels: Some(label_map(labels)),
            ..namespaced(name)
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: Some(volume_name.to_string()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        }),
    }
}

/// Claim that is not bound yet
pub fn pending_claim(name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: namespaced(name),
        spec: Some(PersistentVolumeClaimSpec::default()),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        }),
    }
}

/// Volume provisioned by the test driver
pub fn csi_volume(name: &str, handle: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: DRIVER.to_string(),
                volume_handle: handle.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn create_test_volume_replication_class(name: &str) -> VolumeReplicationClass {
    VolumeReplicationClass::new(
        name,
        VolumeReplicationClassSpec {
            provisioner: DRIVER.to_string(),
            parameters: BTreeMap::from([("mirroringMode".to_string(), "snapshot".to_string())]),
        },
    )
}

pub fn create_test_volume_group_replication_class(name: &str) -> VolumeGroupReplicationClass {
    VolumeGroupReplicationClass::new(
        name,
        VolumeGroupReplicationClassSpec {
            provisioner: DRIVER.to_string(),
            parameters: BTreeMap::new(),
        },
    )
}

pub fn create_test_volume_replication(
    name: &str,
    class: &str,
    claim: &str,
    state: ReplicationState,
) -> VolumeReplication {
    let mut vr = VolumeReplication::new(
        name,
        VolumeReplicationSpec {
            volume_replication_class: class.to_string(),
            replication_state: state,
            data_source: TypedLocalObjectReference::persistent_volume_claim(claim),
            auto_resync: false,
            parameters: BTreeMap::new(),
        },
    );
    vr.metadata.namespace = Some(NAMESPACE.to_string());
    vr
}

pub fn create_test_volume_group_replication(
    name: &str,
    group_class: &str,
    replication_class: &str,
    selector: (&str, &str),
    state: ReplicationState,
) -> VolumeGroupReplication {
    let mut vgr = VolumeGroupReplication::new(
        name,
        VolumeGroupReplicationSpec {
            volume_group_replication_class_name: group_class.to_string(),
            volume_replication_class_name: replication_class.to_string(),
            replication_state: state,
            source: VolumeGroupReplicationSource {
                selector: LabelSelector::from_label(selector.0, selector.1),
            },
            volume_group_replication_content_name: None,
            parameters: BTreeMap::new(),
        },
    );
    vgr.metadata.namespace = Some(NAMESPACE.to_string());
    vgr
}

pub fn create_test_network_fence(name: &str, cidrs: &[&str], state: FenceState) -> NetworkFence {
    NetworkFence::new(
        name,
        NetworkFenceSpec {
            driver: Some(DRIVER.to_string()),
            cidrs: cidrs.iter().map(|c| (*c).to_string()).collect(),
            fence_state: state,
            network_fence_class_name: None,
            secret: None,
            parameters: BTreeMap::new(),
        },
    )
}

pub fn create_test_network_fence_class(name: &str) -> NetworkFenceClass {
    NetworkFenceClass::new(
        name,
        NetworkFenceClassSpec {
            provisioner: DRIVER.to_string(),
            parameters: BTreeMap::from([
                (FENCE_SECRET_NAME_PARAMETER.to_string(), "fence-secret".to_string()),
                (FENCE_SECRET_NAMESPACE_PARAMETER.to_string(), "rook-ceph".to_string()),
            ]),
        },
    )
}

fn job_spec_target(claim: &str) -> TargetSpec {
    TargetSpec {
        persistent_volume_claim: claim.to_string(),
    }
}

pub fn create_test_reclaim_space_job(name: &str, claim: &str) -> ReclaimSpaceJob {
    let mut job = ReclaimSpaceJob::new(
        name,
        ReclaimSpaceJobSpec {
            target: job_spec_target(claim),
            back_off_limit: DEFAULT_BACKOFF_LIMIT,
            retry_deadline_seconds: DEFAULT_RETRY_DEADLINE_SECONDS,
            timeout: None,
        },
    );
    job.metadata.namespace = Some(NAMESPACE.to_string());
    job
}

pub fn create_test_key_rotation_job(name: &str, claim: &str) -> EncryptionKeyRotationJob {
    let mut job = EncryptionKeyRotationJob::new(
        name,
        EncryptionKeyRotationJobSpec {
            target: job_spec_target(claim),
            back_off_limit: DEFAULT_BACKOFF_LIMIT,
            retry_deadline_seconds: DEFAULT_RETRY_DEADLINE_SECONDS,
            timeout: None,
        },
    );
    job.metadata.namespace = Some(NAMESPACE.to_string());
    job
}

pub fn create_test_reclaim_space_cron_job(name: &str, schedule: &str, claim: &str) -> ReclaimSpaceCronJob {
    let mut cron_job = ReclaimSpaceCronJob::new(
        name,
        ReclaimSpaceCronJobSpec {
            schedule: schedule.to_string(),
            job_template: ReclaimSpaceJobTemplateSpec {
                spec: create_test_reclaim_space_job("template", claim).spec,
            },
            suspend: false,
            concurrency_policy: ConcurrencyPolicy::Forbid,
            starting_deadline_seconds: None,
            successful_jobs_history_limit: DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT,
            failed_jobs_history_limit: DEFAULT_FAILED_JOBS_HISTORY_LIMIT,
        },
    );
    cron_job.metadata.namespace = Some(NAMESPACE.to_string());
    cron_job
}

pub fn create_test_key_rotation_cron_job(name: &str, schedule: &str, claim: &str) -> EncryptionKeyRotationCronJob {
    let mut cron_job = EncryptionKeyRotationCronJob::new(
        name,
        EncryptionKeyRotationCronJobSpec {
            schedule: schedule.to_string(),
            job_template: EncryptionKeyRotationJobTemplateSpec {
                spec: create_test_key_rotation_job("template", claim).spec,
            },
            suspend: false,
            concurrency_policy: ConcurrencyPolicy::Forbid,
            starting_deadline_seconds: None,
            successful_jobs_history_limit: DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT,
            failed_jobs_history_limit: DEFAULT_FAILED_JOBS_HISTORY_LIMIT,
        },
    );
    cron_job.metadata.namespace = Some(NAMESPACE.to_string());
    cron_job
}
