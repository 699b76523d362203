//! Kubernetes resource watchers.
//!
//! Every kind is driven by a `kube_runtime::Controller` that hands the
//! changed object to [`Reconciler::drive`]. Cron parents also watch the jobs
//! they own, so a finished job brings its parent back immediately instead of
//! at the next resync.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{Controller, watcher};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crds::{
    EncryptionKeyRotationCronJob, EncryptionKeyRotationJob, NetworkFence, ReclaimSpaceCronJob, ReclaimSpaceJob,
    VolumeGroupReplication, VolumeReplication,
};

use crate::driver::Reconcile;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Quiet period after the last event before a reconcile starts
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Requeue used when a reconcile itself returns an error
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Runs one `kube_runtime::Controller` until its stream ends.
///
/// The driver never surfaces errors (it turns them into requeues), so the
/// error policy only fires if that contract is broken.
async fn run_controller<K>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    Reconciler: Reconcile<K>,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, _ctx: Arc<Reconciler>| {
        error!("Reconciliation error for {} {}: {}", resource_name, obj.name_any(), error);
        Action::requeue(ERROR_REQUEUE)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| async move {
        let namespace = obj.namespace();
        let name = obj.name_any();
        debug!("Reconciling {} {}", resource_name, name);
        let requeue = ctx.drive::<K>(namespace.as_deref(), &name).await;
        Ok::<Action, ControllerError>(requeue.into())
    };

    controller
        .with_config(RuntimeConfig::default().debounce(DEBOUNCE).concurrency(concurrency))
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches every kind the controller reconciles
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    concurrency: u16,
    volume_replication_api: Api<VolumeReplication>,
    volume_group_replication_api: Api<VolumeGroupReplication>,
    network_fence_api: Api<NetworkFence>,
    reclaim_space_job_api: Api<ReclaimSpaceJob>,
    reclaim_space_cron_job_api: Api<ReclaimSpaceCronJob>,
    encryption_key_rotation_job_api: Api<EncryptionKeyRotationJob>,
    encryption_key_rotation_cron_job_api: Api<EncryptionKeyRotationCronJob>,
}

impl Watcher {
    /// Creates a watcher; namespaced kinds use `namespace` when one is set
    pub fn new(reconciler: Arc<Reconciler>, client: kube::Client, namespace: Option<&str>, concurrency: u16) -> Self {
        Self {
            reconciler,
            concurrency,
            volume_replication_api: scoped_api(client.clone(), namespace),
            volume_group_replication_api: scoped_api(client.clone(), namespace),
            network_fence_api: Api::all(client.clone()),
            reclaim_space_job_api: scoped_api(client.clone(), namespace),
            reclaim_space_cron_job_api: scoped_api(client.clone(), namespace),
            encryption_key_rotation_job_api: scoped_api(client.clone(), namespace),
            encryption_key_rotation_cron_job_api: scoped_api(client, namespace),
        }
    }

    fn controller<K>(api: Api<K>) -> Controller<K>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    {
        Controller::new(api, watcher::Config::default())
    }

    pub async fn watch_volume_replications(&self) -> Result<(), ControllerError> {
        run_controller(
            Self::controller(self.volume_replication_api.clone()),
            self.reconciler.clone(),
            "VolumeReplication",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_volume_group_replications(&self) -> Result<(), ControllerError> {
        run_controller(
            Self::controller(self.volume_group_replication_api.clone()),
            self.reconciler.clone(),
            "VolumeGroupReplication",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_network_fences(&self) -> Result<(), ControllerError> {
        run_controller(
            Self::controller(self.network_fence_api.clone()),
            self.reconciler.clone(),
            "NetworkFence",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_reclaim_space_jobs(&self) -> Result<(), ControllerError> {
        run_controller(
            Self::controller(self.reclaim_space_job_api.clone()),
            self.reconciler.clone(),
            "ReclaimSpaceJob",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_reclaim_space_cron_jobs(&self) -> Result<(), ControllerError> {
        let controller = Self::controller(self.reclaim_space_cron_job_api.clone())
            .owns(self.reclaim_space_job_api.clone(), watcher::Config::default());
        run_controller(
            controller,
            self.reconciler.clone(),
            "ReclaimSpaceCronJob",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_encryption_key_rotation_jobs(&self) -> Result<(), ControllerError> {
        run_controller(
            Self::controller(self.encryption_key_rotation_job_api.clone()),
            self.reconciler.clone(),
            "EncryptionKeyRotationJob",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_encryption_key_rotation_cron_jobs(&self) -> Result<(), ControllerError> {
        let controller = Self::controller(self.encryption_key_rotation_cron_job_api.clone())
            .owns(self.encryption_key_rotation_job_api.clone(), watcher::Config::default());
        run_controller(
            controller,
            self.reconciler.clone(),
            "EncryptionKeyRotationCronJob",
            self.concurrency,
        )
        .await
    }
}

fn scoped_api<K>(client: kube::Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}
