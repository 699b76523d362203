//! NetworkFence reconciler

use agent_client::{FenceRequest, SecretRef};
use tracing::{info, warn};

use cluster_store::{ResourceStore, object_key};
use crds::{
    FENCE_SECRET_NAME_PARAMETER, FENCE_SECRET_NAMESPACE_PARAMETER, FenceState, NetworkFence, NetworkFenceClass,
    NetworkFenceStatus, merge_parameters,
};

use crate::driver::{Outcome, Reconcile};
use crate::error::ControllerError;
use crate::finalizer::{NETWORK_FENCE_FINALIZER, add_finalizer, has_finalizer, remove_finalizer};
use crate::reconciler::{Reconciler, split_secret};
use crate::state_machine::fence::{self, FenceStep};

/// Builds the agent request from the fence and its optional class.
///
/// The reserved secret keys are taken out of the class parameters; a secret
/// in the fence spec overrides the class secret.
fn fence_request(fence: &NetworkFence, class: Option<&NetworkFenceClass>) -> Result<FenceRequest, String> {
    let driver = fence
        .spec
        .driver
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| class.map(|c| c.spec.provisioner.clone()))
        .ok_or_else(|| "no driver set and no NetworkFenceClass to take it from".to_string())?;
    if fence.spec.cidrs.is_empty() {
        return Err("cidrs must not be empty".to_string());
    }

    let mut class_parameters = class.map(|c| c.spec.parameters.clone()).unwrap_or_default();
    let class_secret = split_secret(
        &mut class_parameters,
        FENCE_SECRET_NAME_PARAMETER,
        FENCE_SECRET_NAMESPACE_PARAMETER,
    );
    let mut parameters = merge_parameters(&class_parameters, &fence.spec.parameters);
    parameters.remove(FENCE_SECRET_NAME_PARAMETER);
    parameters.remove(FENCE_SECRET_NAMESPACE_PARAMETER);

    let secret = fence
        .spec
        .secret
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| SecretRef {
            name: s.name.clone(),
            namespace: s.namespace.clone(),
        })
        .or(class_secret);

    Ok(FenceRequest {
        driver,
        cidrs: fence.spec.cidrs.clone(),
        secret,
        parameters,
    })
}

impl Reconciler {
    async fn write_network_fence_status(
        &self,
        fence: &NetworkFence,
        status: NetworkFenceStatus,
    ) -> Result<NetworkFence, ControllerError> {
        if fence.status.as_ref() == Some(&status) {
            return Ok(fence.clone());
        }
        let mut updated = fence.clone();
        updated.status = Some(status);
        Ok(self.stores.network_fences.replace_status(&updated).await?)
    }

    async fn fence_class(&self, fence: &NetworkFence) -> Result<Option<NetworkFenceClass>, ControllerError> {
        match fence.spec.network_fence_class_name.as_deref() {
            Some(name) if !name.is_empty() => Ok(self.stores.network_fence_classes.get(None, name).await?),
            _ => Ok(None),
        }
    }

    async fn call_fence(&self, state: FenceState, request: &FenceRequest) -> Result<(), agent_client::AgentError> {
        match state {
            FenceState::Fenced => self.agent.fence(request).await.map(|_| ()),
            FenceState::Unfenced => self.agent.unfence(request).await.map(|_| ()),
        }
    }
}

#[async_trait::async_trait]
impl Reconcile<NetworkFence> for Reconciler {
    fn store(&self) -> &dyn ResourceStore<NetworkFence> {
        self.stores.network_fences.as_ref()
    }

    async fn apply(&self, fence: NetworkFence) -> Result<Outcome, ControllerError> {
        let key = object_key(&fence);
        let fence = add_finalizer(self.stores.network_fences.as_ref(), fence, NETWORK_FENCE_FINALIZER).await?;
        let generation = fence.metadata.generation;
        let mut status = fence.status.clone().unwrap_or_default();

        let class = self.fence_class(&fence).await?;
        if class.is_none() && fence.spec.network_fence_class_name.as_deref().is_some_and(|n| !n.is_empty()) {
            let message = format!(
                "NetworkFenceClass {} not found",
                fence.spec.network_fence_class_name.as_deref().unwrap_or_default()
            );
            warn!("NetworkFence {} blocked: {}", key, message);
            fence::apply_invalid(&mut status, &message, generation);
            self.write_network_fence_status(&fence, status).await?;
            return Ok(Outcome::Blocked);
        }
        let request = match fence_request(&fence, class.as_ref()) {
            Ok(request) => request,
            Err(message) => {
                warn!("NetworkFence {} blocked: {}", key, message);
                fence::apply_invalid(&mut status, &message, generation);
                self.write_network_fence_status(&fence, status).await?;
                return Ok(Outcome::Blocked);
            }
        };

        let desired = match fence::next_step(fence.spec.fence_state, &status, generation) {
            FenceStep::InSync => return Ok(Outcome::Synced),
            FenceStep::Apply(desired) => desired,
        };

        // Readers must not see the previous generation's result while the
        // new call is in flight
        let fence = if fence::apply_pending(&mut status, desired, generation) {
            self.write_network_fence_status(&fence, status.clone()).await?
        } else {
            fence
        };

        let outcome = match self.call_fence(desired, &request).await {
            Ok(()) => {
                info!("NetworkFence {}: {}", key, desired.success_message());
                fence::apply_success(&mut status, desired, generation);
                Outcome::Synced
            }
            Err(e) => {
                warn!("NetworkFence {}: {} failed: {}", key, desired.operation(), e);
                fence::apply_failure(&mut status, desired, &e.to_string(), generation);
                Outcome::AgentFailed
            }
        };
        self.write_network_fence_status(&fence, status).await?;
        Ok(outcome)
    }

    async fn cleanup(&self, fence: NetworkFence) -> Result<Outcome, ControllerError> {
        if !has_finalizer(&fence, NETWORK_FENCE_FINALIZER) {
            return Ok(Outcome::Done);
        }
        let key = object_key(&fence);
        let mut status = fence.status.clone().unwrap_or_default();

        if let Some(release) = fence::cleanup_step(&status) {
            let class = self.fence_class(&fence).await?;
            match fence_request(&fence, class.as_ref()) {
                Ok(request) => match self.call_fence(release, &request).await {
                    Err(e) if !e.is_not_found() => {
                        warn!("NetworkFence {}: unfence before deletion failed: {}", key, e);
                        fence::apply_failure(&mut status, release, &e.to_string(), fence.metadata.generation);
                        self.write_network_fence_status(&fence, status).await?;
                        return Ok(Outcome::AgentFailed);
                    }
                    _ => info!("NetworkFence {}: unfenced before deletion", key),
                },
                Err(message) => warn!("NetworkFence {}: cannot unfence before deletion: {}", key, message),
            }
        }

        remove_finalizer(self.stores.network_fences.as_ref(), fence, NETWORK_FENCE_FINALIZER).await?;
        Ok(Outcome::Done)
    }
}
