//! VolumeReplication reconciler
//!
//! A pass validates the intent, captures the claim's name and volume handle
//! into status the first time the claim resolves, protects the claim and then
//! issues at most one replication call. Deletion disables replication using
//! the captured handle and releases the captured claim, so it never depends
//! on the claim still existing or on the current `dataSource`.

use agent_client::{AgentError, ReplicationRequest, ReplicationResponse, ReplicationSource};
use kube::ResourceExt;
use tracing::{info, warn};

use cluster_store::{ResourceStore, object_key};
use crds::{ReplicationStatus, VolumeReplication, merge_parameters};

use crate::driver::{Outcome, Reconcile};
use crate::error::ControllerError;
use crate::finalizer::{
    PVC_PROTECTION_FINALIZER, REPLICATION_FINALIZER, add_finalizer, has_finalizer, is_deleting, protect, release,
    remove_finalizer,
};
use crate::reconciler::{
    ClaimBinding, REPLICATION_SECRET_NAME_PARAMETER, REPLICATION_SECRET_NAMESPACE_PARAMETER, Reconciler,
    replication_id, replication_outcome, split_secret,
};
use crate::state_machine::replication::{self, ReplicationStep};

impl Reconciler {
    /// Issues the agent call for `step`
    pub(crate) async fn call_replication(
        &self,
        step: ReplicationStep,
        request: &ReplicationRequest,
    ) -> Result<ReplicationResponse, AgentError> {
        match step {
            ReplicationStep::Enable => match self.agent.enable_replication(request).await {
                Err(e) if e.is_already_exists() => Ok(ReplicationResponse::default()),
                other => other,
            },
            ReplicationStep::Promote => self.agent.promote(request).await,
            ReplicationStep::Demote => self.agent.demote(request).await,
            ReplicationStep::Resync => self.agent.resync(request).await,
            ReplicationStep::Disable => match self.agent.disable_replication(request).await {
                Err(e) if e.is_not_found() => Ok(ReplicationResponse::default()),
                other => other,
            },
            ReplicationStep::InSync => Ok(ReplicationResponse::default()),
        }
    }

    async fn write_volume_replication_status(
        &self,
        vr: &VolumeReplication,
        status: ReplicationStatus,
    ) -> Result<(), ControllerError> {
        if vr.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let mut updated = vr.clone();
        updated.status = Some(status);
        self.stores.volume_replications.replace_status(&updated).await?;
        Ok(())
    }

    async fn block_volume_replication(
        &self,
        vr: &VolumeReplication,
        mut status: ReplicationStatus,
        reason: &str,
        message: String,
    ) -> Result<Outcome, ControllerError> {
        warn!("VolumeReplication {} blocked: {}", object_key(vr), message);
        replication::apply_invalid(&mut status, reason, &message, vr.metadata.generation);
        self.write_volume_replication_status(vr, status).await?;
        Ok(Outcome::Blocked)
    }

    /// True when another live intent in the namespace still protects `claim`
    async fn claim_referenced_elsewhere(&self, vr: &VolumeReplication, claim: &str) -> Result<bool, ControllerError> {
        let others = self.stores.volume_replications.list(vr.namespace().as_deref()).await?;
        Ok(others
            .iter()
            .any(|other| other.uid() != vr.uid() && !is_deleting(other) && protected_claim(other) == claim))
    }
}

/// Claim an intent protects: the captured one, else the one it names
fn protected_claim(vr: &VolumeReplication) -> &str {
    vr.status
        .as_ref()
        .and_then(|status| status.claim_name.as_deref())
        .unwrap_or(&vr.spec.data_source.name)
}

#[async_trait::async_trait]
impl Reconcile<VolumeReplication> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<VolumeReplication> {
        self.stores.volume_replications.as_ref()
    }

    async fn apply(&self, vr: VolumeReplication) -> Result<Outcome, ControllerError> {
        let key = object_key(&vr);
        let namespace = vr.namespace();
        let generation = vr.metadata.generation;
        let mut status = vr.status.clone().unwrap_or_default();

        if !vr.spec.data_source.is_persistent_volume_claim() {
            let message = format!(
                "dataSource kind {} is not supported, only PersistentVolumeClaim",
                vr.spec.data_source.kind
            );
            return self.block_volume_replication(&vr, status, "InvalidDataSource", message).await;
        }

        let vr = add_finalizer(self.stores.volume_replications.as_ref(), vr, REPLICATION_FINALIZER).await?;

        let Some(class) = self
            .stores
            .volume_replication_classes
            .get(None, &vr.spec.volume_replication_class)
            .await?
        else {
            let message = format!("VolumeReplicationClass {} not found", vr.spec.volume_replication_class);
            return self.block_volume_replication(&vr, status, "ClassNotFound", message).await;
        };

        let claim_name = vr.spec.data_source.name.clone();
        let (volume_handle, driver) = match (status.volume_handle.clone(), status.driver.clone()) {
            (Some(handle), Some(driver)) => {
                let captured = status.claim_name.get_or_insert_with(|| claim_name.clone()).clone();
                if captured != claim_name {
                    let message = format!(
                        "dataSource changed from {} to {}; the replicated claim cannot be changed",
                        captured, claim_name
                    );
                    return self.block_volume_replication(&vr, status, "DataSourceChanged", message).await;
                }
                (handle, driver)
            }
            _ => match self.resolve_claim(namespace.as_deref(), &claim_name).await? {
                ClaimBinding::Bound(volume) => {
                    status.volume_handle = Some(volume.volume_handle.clone());
                    status.driver = Some(volume.driver.clone());
                    status.claim_name = Some(claim_name.clone());
                    (volume.volume_handle, volume.driver)
                }
                ClaimBinding::Missing => {
                    let message = format!("PersistentVolumeClaim {} not found", claim_name);
                    return self.block_volume_replication(&vr, status, "PVCNotFound", message).await;
                }
                ClaimBinding::Unbound => {
                    let message = format!("PersistentVolumeClaim {} is not bound", claim_name);
                    return self.block_volume_replication(&vr, status, "PVCNotBound", message).await;
                }
                ClaimBinding::NoCsiVolume => {
                    let message = format!("PersistentVolumeClaim {} is not backed by a CSI volume", claim_name);
                    return self.block_volume_replication(&vr, status, "NotCSIVolume", message).await;
                }
            },
        };
        if driver != class.spec.provisioner {
            let message = format!(
                "volume driver {} does not match class provisioner {}",
                driver, class.spec.provisioner
            );
            return self.block_volume_replication(&vr, status, "DriverMismatch", message).await;
        }

        protect(
            self.stores.claims.as_ref(),
            namespace.as_deref(),
            &claim_name,
            PVC_PROTECTION_FINALIZER,
        )
        .await?;

        replication::apply_valid(&mut status, generation);
        let step = replication::next_step(vr.spec.replication_state, vr.spec.auto_resync, &status);
        if step == ReplicationStep::InSync {
            replication::apply_in_sync(&mut status, vr.spec.replication_state, generation);
            self.write_volume_replication_status(&vr, status).await?;
            return Ok(Outcome::Synced);
        }

        let mut parameters = merge_parameters(&class.spec.parameters, &vr.spec.parameters);
        let secret = split_secret(
            &mut parameters,
            REPLICATION_SECRET_NAME_PARAMETER,
            REPLICATION_SECRET_NAMESPACE_PARAMETER,
        );
        let request = ReplicationRequest {
            driver,
            source: ReplicationSource::Volume(volume_handle),
            replication_id: replication_id(&vr),
            parameters,
            secret,
            force: false,
        };

        let now = self.now();
        status.last_start_time = Some(now);
        let outcome = match self.call_replication(step, &request).await {
            Ok(response) => {
                info!("VolumeReplication {}: {} succeeded", key, step.operation());
                replication::apply_success(&mut status, step, vr.spec.replication_state, &response, generation, now);
                replication_outcome(step, &status)
            }
            Err(e) => {
                warn!("VolumeReplication {}: {} failed: {}", key, step.operation(), e);
                replication::apply_failure(&mut status, step, &e.to_string(), generation);
                Outcome::AgentFailed
            }
        };
        self.write_volume_replication_status(&vr, status).await?;
        Ok(outcome)
    }

    async fn cleanup(&self, vr: VolumeReplication) -> Result<Outcome, ControllerError> {
        if !has_finalizer(&vr, REPLICATION_FINALIZER) {
            return Ok(Outcome::Done);
        }
        let key = object_key(&vr);
        let namespace = vr.namespace();
        let mut status = vr.status.clone().unwrap_or_default();

        if status.replication_enabled {
            if let (Some(handle), Some(driver)) = (status.volume_handle.clone(), status.driver.clone()) {
                // A deleted class only loses its parameters; deletion must still complete
                let class = self
                    .stores
                    .volume_replication_classes
                    .get(None, &vr.spec.volume_replication_class)
                    .await?;
                let mut parameters = merge_parameters(
                    &class.map(|c| c.spec.parameters).unwrap_or_default(),
                    &vr.spec.parameters,
                );
                let secret = split_secret(
                    &mut parameters,
                    REPLICATION_SECRET_NAME_PARAMETER,
                    REPLICATION_SECRET_NAMESPACE_PARAMETER,
                );
                let request = ReplicationRequest {
                    driver,
                    source: ReplicationSource::Volume(handle),
                    replication_id: replication_id(&vr),
                    parameters,
                    secret,
                    force: false,
                };
                if let Err(e) = self.call_replication(ReplicationStep::Disable, &request).await {
                    warn!("VolumeReplication {}: disable failed: {}", key, e);
                    replication::apply_failure(
                        &mut status,
                        ReplicationStep::Disable,
                        &e.to_string(),
                        vr.metadata.generation,
                    );
                    self.write_volume_replication_status(&vr, status).await?;
                    return Ok(Outcome::AgentFailed);
                }
                info!("VolumeReplication {}: replication disabled", key);
            }
        }

        let claim = protected_claim(&vr).to_string();
        let referenced = self.claim_referenced_elsewhere(&vr, &claim).await?;
        release(
            self.stores.claims.as_ref(),
            namespace.as_deref(),
            &claim,
            PVC_PROTECTION_FINALIZER,
            referenced,
        )
        .await?;
        remove_finalizer(self.stores.volume_replications.as_ref(), vr, REPLICATION_FINALIZER).await?;
        Ok(Outcome::Done)
    }
}
