//! Finalizer coordination
//!
//! Intents carry their own finalizer so their deletion runs the backend
//! cleanup first. Claims referenced by a replication intent carry a
//! protection finalizer that is only released once no live intent of that
//! kind references the claim any more.

use kube::{Resource, ResourceExt};
use tracing::debug;

use cluster_store::{ResourceStore, object_key};

use crate::error::ControllerError;

/// Finalizer on VolumeReplication and VolumeGroupReplication
pub const REPLICATION_FINALIZER: &str = "replication.storage.openshift.io";

/// Finalizer on NetworkFence
pub const NETWORK_FENCE_FINALIZER: &str = "csiaddons.openshift.io/network-fence";

/// Finalizer on claims protected by a VolumeReplication
pub const PVC_PROTECTION_FINALIZER: &str = "replication.storage.openshift.io/pvc-protection";

/// Finalizer on claims protected by a VolumeGroupReplication
pub const VGR_PROTECTION_FINALIZER: &str = "replication.storage.openshift.io/vgr-protection";

/// True when `object` carries `finalizer`
pub fn has_finalizer<K: Resource>(object: &K, finalizer: &str) -> bool {
    object.finalizers().iter().any(|f| f == finalizer)
}

/// True once deletion was requested
pub fn is_deleting<K: Resource>(object: &K) -> bool {
    object.meta().deletion_timestamp.is_some()
}

/// Adds `finalizer` and writes the object; returns the stored object
pub async fn add_finalizer<K>(store: &dyn ResourceStore<K>, object: K, finalizer: &str) -> Result<K, ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    if has_finalizer(&object, finalizer) {
        return Ok(object);
    }
    let mut updated = object;
    updated.finalizers_mut().push(finalizer.to_string());
    let stored = store.replace(&updated).await?;
    debug!("Added finalizer {} to {}", finalizer, object_key(&stored));
    Ok(stored)
}

/// Removes `finalizer` and writes the object; returns the last stored object
pub async fn remove_finalizer<K>(store: &dyn ResourceStore<K>, object: K, finalizer: &str) -> Result<K, ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    if !has_finalizer(&object, finalizer) {
        return Ok(object);
    }
    let mut updated = object;
    updated.finalizers_mut().retain(|f| f != finalizer);
    let stored = store.replace(&updated).await?;
    debug!("Removed finalizer {} from {}", finalizer, object_key(&stored));
    Ok(stored)
}

/// Adds `finalizer` to the named object, if it still exists
pub async fn protect<K>(
    store: &dyn ResourceStore<K>,
    namespace: Option<&str>,
    name: &str,
    finalizer: &str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    if let Some(object) = store.get(namespace, name).await? {
        add_finalizer(store, object, finalizer).await?;
    }
    Ok(())
}

/// Removes `finalizer` from the named object unless `still_referenced`.
///
/// A missing object is already released.
pub async fn release<K>(
    store: &dyn ResourceStore<K>,
    namespace: Option<&str>,
    name: &str,
    finalizer: &str,
    still_referenced: bool,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    if still_referenced {
        debug!("Keeping finalizer {} on {}: still referenced", finalizer, name);
        return Ok(());
    }
    if let Some(object) = store.get(namespace, name).await? {
        remove_finalizer(store, object, finalizer).await?;
    }
    Ok(())
}
