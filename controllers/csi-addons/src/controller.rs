//! Main controller implementation.
//!
//! Builds the Kubernetes-backed stores, the agent client stack and the shared
//! `Reconciler`, then runs one watcher per kind next to the probe server.

use std::sync::Arc;

use agent_client::{AgentClient, AgentClientTrait, RetryingAgentClient};
use cluster_store::KubeStore;
use kube::Client;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::SystemClock;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{MeteredAgentClient, Metrics};
use crate::reconciler::{Reconciler, Stores};
use crate::server::{ProbeState, run_probe_server};
use crate::watcher::Watcher;

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for CSI-Addons resources.
pub struct Controller {
    probe: Arc<ProbeState>,
    probe_server: Task,
    volume_replication_watcher: Task,
    volume_group_replication_watcher: Task,
    network_fence_watcher: Task,
    reclaim_space_job_watcher: Task,
    reclaim_space_cron_job_watcher: Task,
    encryption_key_rotation_job_watcher: Task,
    encryption_key_rotation_cron_job_watcher: Task,
}

fn kube_stores(client: &Client) -> Stores {
    Stores {
        volume_replications: Arc::new(KubeStore::namespaced(client.clone())),
        volume_replication_classes: Arc::new(KubeStore::cluster(client.clone())),
        volume_group_replications: Arc::new(KubeStore::namespaced(client.clone())),
        volume_group_replication_classes: Arc::new(KubeStore::cluster(client.clone())),
        volume_group_replication_contents: Arc::new(KubeStore::cluster(client.clone())),
        network_fences: Arc::new(KubeStore::cluster(client.clone())),
        network_fence_classes: Arc::new(KubeStore::cluster(client.clone())),
        reclaim_space_jobs: Arc::new(KubeStore::namespaced(client.clone())),
        reclaim_space_cron_jobs: Arc::new(KubeStore::namespaced(client.clone())),
        encryption_key_rotation_jobs: Arc::new(KubeStore::namespaced(client.clone())),
        encryption_key_rotation_cron_jobs: Arc::new(KubeStore::namespaced(client.clone())),
        claims: Arc::new(KubeStore::namespaced(client.clone())),
        volumes: Arc::new(KubeStore::cluster(client.clone())),
    }
}

/// Agent client with retries inside and metrics outside, so every logical
/// call is counted once
fn agent_stack(config: &ControllerConfig, metrics: Arc<Metrics>) -> Result<Arc<dyn AgentClientTrait>, ControllerError> {
    let client: Arc<dyn AgentClientTrait> = Arc::new(AgentClient::new(config.agent_client_config())?);
    let retrying: Arc<dyn AgentClientTrait> = Arc::new(RetryingAgentClient::new(client, config.retry_policy()));
    Ok(Arc::new(MeteredAgentClient::new(retrying, metrics)))
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing CSI-Addons Controller");

        let client = Client::try_default().await?;
        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );
        let agent = agent_stack(&config, metrics.clone())?;

        let namespace = config.namespace.clone();
        let concurrency = config.reconcile_concurrency;
        let probe_addr = config.probe_addr;
        let reconciler = Arc::new(Reconciler::new(
            kube_stores(&client),
            agent,
            config,
            Arc::new(SystemClock),
            metrics.clone(),
        ));

        let probe = Arc::new(ProbeState::new(metrics));
        let probe_server = {
            let probe = probe.clone();
            tokio::spawn(async move { run_probe_server(probe_addr, probe).await })
        };

        let watcher = Arc::new(Watcher::new(reconciler, client, namespace.as_deref(), concurrency));

        let volume_replication_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_volume_replications().await })
        };

        let volume_group_replication_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_volume_group_replications().await })
        };

        let network_fence_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_network_fences().await })
        };

        let reclaim_space_job_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_reclaim_space_jobs().await })
        };

        let reclaim_space_cron_job_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_reclaim_space_cron_jobs().await })
        };

        let encryption_key_rotation_job_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_encryption_key_rotation_jobs().await })
        };

        let encryption_key_rotation_cron_job_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_encryption_key_rotation_cron_jobs().await })
        };

        Ok(Self {
            probe,
            probe_server,
            volume_replication_watcher,
            volume_group_replication_watcher,
            network_fence_watcher,
            reclaim_space_job_watcher,
            reclaim_space_cron_job_watcher,
            encryption_key_rotation_job_watcher,
            encryption_key_rotation_cron_job_watcher,
        })
    }

    /// Marks the controller ready and waits for any task to exit.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        self.probe.set_ready(true);
        info!("CSI-Addons Controller running");

        // Every task is expected to run forever
        tokio::select! {
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
            result = &mut self.volume_replication_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VolumeReplication watcher panicked: {}", e)))??;
            }
            result = &mut self.volume_group_replication_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VolumeGroupReplication watcher panicked: {}", e)))??;
            }
            result = &mut self.network_fence_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NetworkFence watcher panicked: {}", e)))??;
            }
            result = &mut self.reclaim_space_job_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ReclaimSpaceJob watcher panicked: {}", e)))??;
            }
            result = &mut self.reclaim_space_cron_job_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ReclaimSpaceCronJob watcher panicked: {}", e)))??;
            }
            result = &mut self.encryption_key_rotation_job_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("EncryptionKeyRotationJob watcher panicked: {}", e)))??;
            }
            result = &mut self.encryption_key_rotation_cron_job_watcher => {
                result.map_err(|e| {
                    ControllerError::Watch(format!("EncryptionKeyRotationCronJob watcher panicked: {}", e))
                })??;
            }
        }

        self.probe.set_ready(false);
        Err(ControllerError::Watch("a controller task exited unexpectedly".to_string()))
    }
}
