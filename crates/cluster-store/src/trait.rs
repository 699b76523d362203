//! ResourceStore trait for mocking
//!
//! The kube-backed store and the in-memory test store both implement this
//! trait, so reconcilers never depend on a live API server.

use kube::{Resource, ResourceExt};

use crate::error::StoreError;

/// Get/list/update access to one resource kind.
///
/// `namespace` is `None` for cluster-scoped kinds, and for namespaced kinds
/// means "all namespaces" in [`ResourceStore::list`].
#[async_trait::async_trait]
pub trait ResourceStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Fetches one object; `Ok(None)` when it does not exist
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError>;

    /// Lists objects
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError>;

    /// Creates an object; fails with `AlreadyExists` when the name is taken
    async fn create(&self, object: &K) -> Result<K, StoreError>;

    /// Replaces metadata and spec, guarded by the object's resource version
    async fn replace(&self, object: &K) -> Result<K, StoreError>;

    /// Replaces the status subresource, guarded by the object's resource version
    async fn replace_status(&self, object: &K) -> Result<K, StoreError>;

    /// Requests deletion; absent objects are not an error
    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;
}

/// `namespace/name` (or just `name` for cluster-scoped objects), for logs and keys
pub fn object_key<K: Resource>(object: &K) -> String {
    match object.namespace() {
        Some(namespace) => format!("{}/{}", namespace, object.name_any()),
        None => object.name_any(),
    }
}
