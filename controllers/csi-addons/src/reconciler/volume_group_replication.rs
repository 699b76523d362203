//! VolumeGroupReplication reconciler
//!
//! Each pass resolves the members fresh from the claim inventory, then
//! either performs one membership change on the backend group (recorded in
//! the content resource) or, once the group matches the members, one
//! replication call on the group handle.
//!
//! Deletion disables replication, deletes the backend group, releases the
//! member claims and finally deletes the content resource.

use std::collections::{BTreeMap, BTreeSet};

use agent_client::{
    CreateGroupRequest, DeleteGroupRequest, GroupMemberRequest, ReplicationRequest, ReplicationSource, SecretRef,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use cluster_store::{ResourceStore, object_key};
use crds::{
    GroupReplicationReference, NameReference, OWNER_ANNOTATION, OWNER_NAME_LABEL, OWNER_NAMESPACE_LABEL,
    VolumeGroupReplication, VolumeGroupReplicationClass, VolumeGroupReplicationContent,
    VolumeGroupReplicationContentSource, VolumeGroupReplicationContentSpec, VolumeGroupReplicationContentStatus,
    VolumeGroupReplicationStatus, VolumeReplicationClass, merge_parameters,
};

use crate::driver::{Outcome, Reconcile};
use crate::error::ControllerError;
use crate::finalizer::{
    REPLICATION_FINALIZER, VGR_PROTECTION_FINALIZER, add_finalizer, has_finalizer, is_deleting, protect, release,
    remove_finalizer,
};
use crate::membership::{self, Member, MembershipStep};
use crate::reconciler::{
    GROUP_SECRET_NAME_PARAMETER, GROUP_SECRET_NAMESPACE_PARAMETER, REPLICATION_SECRET_NAME_PARAMETER,
    REPLICATION_SECRET_NAMESPACE_PARAMETER, Reconciler, replication_id, replication_outcome, split_secret,
};
use crate::state_machine::replication::{self, ReplicationStep};

/// Prefix of generated content names
const CONTENT_NAME_PREFIX: &str = "vgrcontent-";

/// Parameters and credentials for group and replication calls
struct GroupCallContext {
    driver: String,
    group_parameters: BTreeMap<String, String>,
    group_secret: Option<SecretRef>,
    replication_parameters: BTreeMap<String, String>,
    replication_secret: Option<SecretRef>,
}

impl GroupCallContext {
    fn new(
        vgr: &VolumeGroupReplication,
        group_class: Option<&VolumeGroupReplicationClass>,
        replication_class: Option<&VolumeReplicationClass>,
        driver: String,
    ) -> Self {
        let mut group_parameters = merge_parameters(
            &group_class.map(|c| c.spec.parameters.clone()).unwrap_or_default(),
            &vgr.spec.parameters,
        );
        let group_secret = split_secret(
            &mut group_parameters,
            GROUP_SECRET_NAME_PARAMETER,
            GROUP_SECRET_NAMESPACE_PARAMETER,
        );
        let mut replication_parameters = replication_class
            .map(|c| c.spec.parameters.clone())
            .unwrap_or_default();
        let replication_secret = split_secret(
            &mut replication_parameters,
            REPLICATION_SECRET_NAME_PARAMETER,
            REPLICATION_SECRET_NAMESPACE_PARAMETER,
        );
        Self {
            driver,
            group_parameters,
            group_secret,
            replication_parameters,
            replication_secret,
        }
    }

    fn member_request(&self, group_handle: &str, volume_handle: &str) -> GroupMemberRequest {
        GroupMemberRequest {
            driver: self.driver.clone(),
            group_handle: group_handle.to_string(),
            volume_handle: volume_handle.to_string(),
            parameters: self.group_parameters.clone(),
            secret: self.group_secret.clone(),
        }
    }

    fn replication_request(&self, vgr: &VolumeGroupReplication, group_handle: &str) -> ReplicationRequest {
        ReplicationRequest {
            driver: self.driver.clone(),
            source: ReplicationSource::Group(group_handle.to_string()),
            replication_id: replication_id(vgr),
            parameters: self.replication_parameters.clone(),
            secret: self.replication_secret.clone(),
            force: false,
        }
    }
}

/// Content name for an intent
pub fn content_name(vgr: &VolumeGroupReplication) -> String {
    format!("{}{}", CONTENT_NAME_PREFIX, replication_id(vgr))
}

fn new_content(vgr: &VolumeGroupReplication, name: &str, provisioner: &str) -> VolumeGroupReplicationContent {
    let namespace = vgr.namespace().unwrap_or_default();
    let vgr_name = vgr.name_any();
    VolumeGroupReplicationContent {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                (OWNER_NAME_LABEL.to_string(), vgr_name.clone()),
                (OWNER_NAMESPACE_LABEL.to_string(), namespace.clone()),
            ])),
            annotations: Some(BTreeMap::from([(
                OWNER_ANNOTATION.to_string(),
                format!("{}/{}", namespace, vgr_name),
            )])),
            ..Default::default()
        },
        spec: VolumeGroupReplicationContentSpec {
            volume_group_replication_ref: GroupReplicationReference {
                name: vgr_name,
                namespace,
                uid: vgr.uid(),
            },
            provisioner: provisioner.to_string(),
            volume_group_replication_class_name: vgr.spec.volume_group_replication_class_name.clone(),
            volume_group_replication_handle: None,
            source: VolumeGroupReplicationContentSource::default(),
        },
        status: None,
    }
}

impl Reconciler {
    async fn write_volume_group_replication_status(
        &self,
        vgr: &VolumeGroupReplication,
        status: VolumeGroupReplicationStatus,
    ) -> Result<(), ControllerError> {
        if vgr.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let mut updated = vgr.clone();
        updated.status = Some(status);
        self.stores.volume_group_replications.replace_status(&updated).await?;
        Ok(())
    }

    async fn block_volume_group_replication(
        &self,
        vgr: &VolumeGroupReplication,
        mut status: VolumeGroupReplicationStatus,
        reason: &str,
        message: String,
    ) -> Result<Outcome, ControllerError> {
        warn!("VolumeGroupReplication {} blocked: {}", object_key(vgr), message);
        replication::apply_invalid(&mut status.replication, reason, &message, vgr.metadata.generation);
        self.write_volume_group_replication_status(vgr, status).await?;
        Ok(Outcome::Blocked)
    }

    async fn group_call_failed(
        &self,
        vgr: &VolumeGroupReplication,
        mut status: VolumeGroupReplicationStatus,
        operation: &str,
        error: &str,
    ) -> Result<Outcome, ControllerError> {
        warn!("VolumeGroupReplication {}: {} failed: {}", object_key(vgr), operation, error);
        let message = format!("{} failed: {}", operation, error);
        replication::apply_invalid(&mut status.replication, "GroupOperationFailed", &message, vgr.metadata.generation);
        self.write_volume_group_replication_status(vgr, status).await?;
        Ok(Outcome::AgentFailed)
    }

    /// Ensures the content name is recorded in the intent spec
    async fn ensure_content_name(&self, vgr: VolumeGroupReplication) -> Result<VolumeGroupReplication, ControllerError> {
        if vgr.spec.volume_group_replication_content_name.is_some() {
            return Ok(vgr);
        }
        let mut updated = vgr;
        updated.spec.volume_group_replication_content_name = Some(content_name(&updated));
        Ok(self.stores.volume_group_replications.replace(&updated).await?)
    }

    async fn get_or_create_content(
        &self,
        vgr: &VolumeGroupReplication,
        name: &str,
        provisioner: &str,
    ) -> Result<VolumeGroupReplicationContent, ControllerError> {
        let contents = self.stores.volume_group_replication_contents.as_ref();
        if let Some(content) = contents.get(None, name).await? {
            return Ok(content);
        }
        let created = contents.create(&new_content(vgr, name, provisioner)).await?;
        info!("Created VolumeGroupReplicationContent {} for {}", name, object_key(vgr));
        Ok(created)
    }

    /// Performs one membership step on the backend group.
    ///
    /// Returns `None` once the group matches `members`.
    async fn step_membership(
        &self,
        vgr: &VolumeGroupReplication,
        status: &VolumeGroupReplicationStatus,
        mut content: VolumeGroupReplicationContent,
        members: &[Member],
        context: &GroupCallContext,
    ) -> Result<Option<Outcome>, ControllerError> {
        let desired: Vec<String> = members.iter().map(|m| m.volume.volume_handle.clone()).collect();
        let group_handle = content.spec.volume_group_replication_handle.clone();
        let step = membership::plan(
            group_handle.as_deref(),
            &content.spec.source.volume_handles,
            &desired,
        );

        let result = match &step {
            MembershipStep::Converged => return Ok(None),
            MembershipStep::CreateGroup { handles } => {
                let request = CreateGroupRequest {
                    driver: context.driver.clone(),
                    name: content.name_any(),
                    volume_handles: handles.clone(),
                    parameters: context.group_parameters.clone(),
                    secret: context.group_secret.clone(),
                };
                self.agent.create_group(&request).await.map(|response| {
                    content.spec.volume_group_replication_handle = Some(response.group_handle);
                })
            }
            MembershipStep::Add(handle) => {
                let request = context.member_request(group_handle.as_deref().unwrap_or_default(), handle);
                match self.agent.add_volume_to_group(&request).await {
                    Err(e) if !e.is_already_exists() => Err(e),
                    _ => Ok(()),
                }
            }
            MembershipStep::Remove(handle) => {
                let request = context.member_request(group_handle.as_deref().unwrap_or_default(), handle);
                match self.agent.remove_volume_from_group(&request).await {
                    Err(e) if !e.is_not_found() => Err(e),
                    _ => Ok(()),
                }
            }
        };

        if let Err(e) = result {
            let operation = match step {
                MembershipStep::CreateGroup { .. } => "create_group",
                MembershipStep::Add(_) => "add_volume_to_group",
                _ => "remove_volume_from_group",
            };
            return self
                .group_call_failed(vgr, status.clone(), operation, &e.to_string())
                .await
                .map(Some);
        }

        membership::record(&mut content.spec.source.volume_handles, &step);
        debug!("VolumeGroupReplication {}: membership step {:?} applied", object_key(vgr), step);
        self.stores.volume_group_replication_contents.replace(&content).await?;
        Ok(Some(Outcome::Continue))
    }

    /// Names of claims recorded in other live group intents of the namespace
    async fn claims_referenced_elsewhere(&self, vgr: &VolumeGroupReplication) -> Result<BTreeSet<String>, ControllerError> {
        let others = self.stores.volume_group_replications.list(vgr.namespace().as_deref()).await?;
        Ok(others
            .iter()
            .filter(|other| other.uid() != vgr.uid() && !is_deleting(*other))
            .filter_map(|other| other.status.as_ref())
            .flat_map(|status| status.persistent_volume_claims_ref_list.iter().map(|r| r.name.clone()))
            .collect())
    }

    async fn release_group_claims(
        &self,
        vgr: &VolumeGroupReplication,
        claims: impl IntoIterator<Item = String>,
    ) -> Result<(), ControllerError> {
        let referenced = self.claims_referenced_elsewhere(vgr).await?;
        let namespace = vgr.namespace();
        for claim in claims {
            release(
                self.stores.claims.as_ref(),
                namespace.as_deref(),
                &claim,
                VGR_PROTECTION_FINALIZER,
                referenced.contains(&claim),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconcile<VolumeGroupReplication> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<VolumeGroupReplication> {
        self.stores.volume_group_replications.as_ref()
    }

    async fn apply(&self, vgr: VolumeGroupReplication) -> Result<Outcome, ControllerError> {
        let key = object_key(&vgr);
        let namespace = vgr.namespace();
        let status = vgr.status.clone().unwrap_or_default();

        let vgr = add_finalizer(self.stores.volume_group_replications.as_ref(), vgr, REPLICATION_FINALIZER).await?;

        let Some(group_class) = self
            .stores
            .volume_group_replication_classes
            .get(None, &vgr.spec.volume_group_replication_class_name)
            .await?
        else {
            let message = format!(
                "VolumeGroupReplicationClass {} not found",
                vgr.spec.volume_group_replication_class_name
            );
            return self.block_volume_group_replication(&vgr, status, "ClassNotFound", message).await;
        };
        let Some(replication_class) = self
            .stores
            .volume_replication_classes
            .get(None, &vgr.spec.volume_replication_class_name)
            .await?
        else {
            let message = format!("VolumeReplicationClass {} not found", vgr.spec.volume_replication_class_name);
            return self.block_volume_group_replication(&vgr, status, "ClassNotFound", message).await;
        };
        let provisioner = group_class.spec.provisioner.clone();
        if replication_class.spec.provisioner != provisioner {
            let message = format!(
                "VolumeReplicationClass provisioner {} does not match group provisioner {}",
                replication_class.spec.provisioner, provisioner
            );
            return self.block_volume_group_replication(&vgr, status, "DriverMismatch", message).await;
        }

        let vgr = self.ensure_content_name(vgr).await?;
        let generation = vgr.metadata.generation;
        let content_name = vgr
            .spec
            .volume_group_replication_content_name
            .clone()
            .unwrap_or_else(|| content_name(&vgr));

        let inventory = self.claim_inventory(namespace.as_deref()).await?;
        let members = membership::resolve_members(&vgr.spec.source.selector, &inventory);
        if members.is_empty() {
            let message = "source selector matched no bound PersistentVolumeClaims".to_string();
            return self.block_volume_group_replication(&vgr, status, "NoMatchingClaims", message).await;
        }
        if let Some(foreign) = members.iter().find(|m| m.volume.driver != provisioner) {
            let message = format!(
                "PersistentVolumeClaim {} uses driver {}, group provisioner is {}",
                foreign.claim, foreign.volume.driver, provisioner
            );
            return self.block_volume_group_replication(&vgr, status, "DriverMismatch", message).await;
        }

        for member in &members {
            protect(
                self.stores.claims.as_ref(),
                namespace.as_deref(),
                &member.claim,
                VGR_PROTECTION_FINALIZER,
            )
            .await?;
        }

        let context = GroupCallContext::new(&vgr, Some(&group_class), Some(&replication_class), provisioner.clone());
        let content = self.get_or_create_content(&vgr, &content_name, &provisioner).await?;
        if let Some(outcome) = self
            .step_membership(&vgr, &status, content.clone(), &members, &context)
            .await?
        {
            return Ok(outcome);
        }

        // Membership converged: content handles equal the member handles
        let pv_refs: Vec<NameReference> = members
            .iter()
            .map(|m| NameReference::new(&m.volume.pv_name))
            .collect();
        let content_status = VolumeGroupReplicationContentStatus {
            persistent_volume_ref_list: pv_refs,
        };
        if content.status.as_ref() != Some(&content_status) {
            let mut updated = content.clone();
            updated.status = Some(content_status);
            self.stores.volume_group_replication_contents.replace_status(&updated).await?;
        }

        let mut status = status;
        let member_refs: Vec<NameReference> = members.iter().map(|m| NameReference::new(&m.claim)).collect();
        let current: BTreeSet<&String> = members.iter().map(|m| &m.claim).collect();
        let dropped: Vec<String> = status
            .persistent_volume_claims_ref_list
            .iter()
            .filter(|r| !current.contains(&r.name))
            .map(|r| r.name.clone())
            .collect();
        status.persistent_volume_claims_ref_list = member_refs;
        self.release_group_claims(&vgr, dropped).await?;

        let Some(group_handle) = content.spec.volume_group_replication_handle.clone() else {
            return Ok(Outcome::Continue);
        };

        replication::apply_valid(&mut status.replication, generation);
        let step = replication::next_step(vgr.spec.replication_state, false, &status.replication);
        if step == ReplicationStep::InSync {
            replication::apply_in_sync(&mut status.replication, vgr.spec.replication_state, generation);
            self.write_volume_group_replication_status(&vgr, status).await?;
            return Ok(Outcome::Synced);
        }

        let now = self.now();
        status.replication.last_start_time = Some(now);
        let request = context.replication_request(&vgr, &group_handle);
        let outcome = match self.call_replication(step, &request).await {
            Ok(response) => {
                info!("VolumeGroupReplication {}: {} succeeded", key, step.operation());
                replication::apply_success(
                    &mut status.replication,
                    step,
                    vgr.spec.replication_state,
                    &response,
                    generation,
                    now,
                );
                replication_outcome(step, &status.replication)
            }
            Err(e) => {
                warn!("VolumeGroupReplication {}: {} failed: {}", key, step.operation(), e);
                replication::apply_failure(&mut status.replication, step, &e.to_string(), generation);
                Outcome::AgentFailed
            }
        };
        self.write_volume_group_replication_status(&vgr, status).await?;
        Ok(outcome)
    }

    async fn cleanup(&self, vgr: VolumeGroupReplication) -> Result<Outcome, ControllerError> {
        if !has_finalizer(&vgr, REPLICATION_FINALIZER) {
            return Ok(Outcome::Done);
        }
        let key = object_key(&vgr);
        let mut status = vgr.status.clone().unwrap_or_default();
        let contents = self.stores.volume_group_replication_contents.as_ref();
        let content = match vgr.spec.volume_group_replication_content_name.as_deref() {
            Some(name) => contents.get(None, name).await?,
            None => None,
        };
        let group_handle = content
            .as_ref()
            .and_then(|c| c.spec.volume_group_replication_handle.clone());

        if let (Some(content), Some(group_handle)) = (content.as_ref(), group_handle.as_deref()) {
            let group_class = self
                .stores
                .volume_group_replication_classes
                .get(None, &vgr.spec.volume_group_replication_class_name)
                .await?;
            let replication_class = self
                .stores
                .volume_replication_classes
                .get(None, &vgr.spec.volume_replication_class_name)
                .await?;
            let context = GroupCallContext::new(
                &vgr,
                group_class.as_ref(),
                replication_class.as_ref(),
                content.spec.provisioner.clone(),
            );

            if status.replication.replication_enabled {
                let request = context.replication_request(&vgr, group_handle);
                return match self.call_replication(ReplicationStep::Disable, &request).await {
                    Ok(response) => {
                        info!("VolumeGroupReplication {}: replication disabled", key);
                        replication::apply_success(
                            &mut status.replication,
                            ReplicationStep::Disable,
                            vgr.spec.replication_state,
                            &response,
                            vgr.metadata.generation,
                            self.now(),
                        );
                        self.write_volume_group_replication_status(&vgr, status).await?;
                        Ok(Outcome::Continue)
                    }
                    Err(e) => {
                        warn!("VolumeGroupReplication {}: disable failed: {}", key, e);
                        replication::apply_failure(
                            &mut status.replication,
                            ReplicationStep::Disable,
                            &e.to_string(),
                            vgr.metadata.generation,
                        );
                        self.write_volume_group_replication_status(&vgr, status).await?;
                        Ok(Outcome::AgentFailed)
                    }
                };
            }

            let request = DeleteGroupRequest {
                driver: context.driver.clone(),
                group_handle: group_handle.to_string(),
                secret: context.group_secret.clone(),
            };
            match self.agent.delete_group(&request).await {
                Err(e) if !e.is_not_found() => {
                    return self.group_call_failed(&vgr, status, "delete_group", &e.to_string()).await;
                }
                _ => info!("VolumeGroupReplication {}: group {} deleted", key, group_handle),
            }
        }

        // Release everything this intent may have protected
        let mut claims: BTreeSet<String> = status
            .persistent_volume_claims_ref_list
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let inventory = self.claim_inventory(vgr.namespace().as_deref()).await?;
        claims.extend(
            membership::resolve_members(&vgr.spec.source.selector, &inventory)
                .into_iter()
                .map(|m| m.claim),
        );
        self.release_group_claims(&vgr, claims).await?;

        if let Some(content) = content {
            contents.delete(None, &content.name_any()).await?;
            info!("Deleted VolumeGroupReplicationContent {}", content.name_any());
        }
        remove_finalizer(self.stores.volume_group_replications.as_ref(), vgr, REPLICATION_FINALIZER).await?;
        Ok(Outcome::Done)
    }
}
