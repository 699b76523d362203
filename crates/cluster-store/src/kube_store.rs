//! ResourceStore backed by the Kubernetes API server

use std::fmt::Debug;
use std::marker::PhantomData;

use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::StoreError;
use crate::store_trait::ResourceStore;

fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

fn cluster_api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope>,
    K::DynamicType: Default,
{
    Api::all(client)
}

/// Store for one resource kind, talking to the API server
pub struct KubeStore<K> {
    client: Client,
    api_for: fn(Client, Option<&str>) -> Api<K>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_for: self.api_for,
            _kind: PhantomData,
        }
    }
}

impl<K> Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    /// Store for a namespaced kind
    pub fn namespaced(client: Client) -> Self {
        Self {
            client,
            api_for: namespaced_api::<K>,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = ClusterResourceScope>,
    K::DynamicType: Default,
{
    /// Store for a cluster-scoped kind
    pub fn cluster(client: Client) -> Self {
        Self {
            client,
            api_for: cluster_api::<K>,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K> {
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        (self.api_for)(self.client.clone(), namespace)
    }
}

fn required_name<K: Resource>(object: &K) -> Result<String, StoreError> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("object has no name".to_string()))
}

#[async_trait::async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let name = required_name(object)?;
        match self
            .api(object.namespace().as_deref())
            .create(&PostParams::default(), object)
            .await
        {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Err(StoreError::AlreadyExists(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let name = required_name(object)?;
        if object.resource_version().is_none() {
            return Err(StoreError::Invalid(format!("{name} has no resourceVersion")));
        }
        let replaced = self
            .api(object.namespace().as_deref())
            .replace(&name, &PostParams::default(), object)
            .await?;
        debug!("Replaced {} (resourceVersion {:?})", name, replaced.resource_version());
        Ok(replaced)
    }

    async fn replace_status(&self, object: &K) -> Result<K, StoreError> {
        let name = required_name(object)?;
        let resource_version = object
            .resource_version()
            .ok_or_else(|| StoreError::Invalid(format!("{name} has no resourceVersion")))?;
        let mut value = serde_json::to_value(object)?;
        let status = value
            .get_mut("status")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);

        // A resourceVersion in a merge patch is checked by the API server
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        let patched = self
            .api(object.namespace().as_deref())
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(patched)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
