//! In-memory ResourceStore for unit testing
//!
//! Mirrors the API-server behavior the controllers rely on:
//! - every write bumps `resourceVersion`, and a write carrying an older
//!   version fails with `Conflict`
//! - `generation` moves only when the spec changes
//! - deleting an object that still has finalizers only sets
//!   `deletionTimestamp`; it disappears once the last finalizer is removed
//! - `replace` never touches status and `replace_status` never touches
//!   metadata or spec

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::StoreError;
use crate::store_trait::ResourceStore;

type Key = (String, String);

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    next_version: u64,
    pending_conflicts: u32,
}

/// Mock store for one resource kind
#[derive(Debug)]
pub struct MemoryStore<K> {
    inner: Arc<Mutex<Inner>>,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_version: 1,
                ..Default::default()
            })),
            _kind: std::marker::PhantomData,
        }
    }
}

fn key(namespace: Option<&str>, name: &str) -> Key {
    (namespace.unwrap_or_default().to_string(), name.to_string())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn finalizers_empty(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty)
}

fn is_deleting(value: &Value) -> bool {
    value
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|v| !v.is_null())
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with `Conflict`
    pub fn inject_conflicts(&self, count: u32) {
        self.inner.lock().unwrap().pending_conflicts = count;
    }

    /// Every object in the store, ordered by namespace and name
    pub fn snapshot(&self) -> Vec<K> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .values()
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// True when the object exists (including objects pending deletion)
    pub fn contains(&self, namespace: Option<&str>, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .contains_key(&key(namespace, name))
    }

    fn next_version(inner: &mut Inner) -> String {
        let version = inner.next_version;
        inner.next_version += 1;
        version.to_string()
    }

    fn take_conflict(inner: &mut Inner) -> bool {
        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            true
        } else {
            false
        }
    }

    /// Looks up the stored object and checks the caller's resource version
    fn current<'a>(inner: &'a mut Inner, object: &K) -> Result<(Key, &'a mut Value), StoreError> {
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("object has no name".to_string()))?;
        let k = key(object.namespace().as_deref(), &name);
        let stored = inner
            .objects
            .get_mut(&k)
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let stored_version = stored
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        if object.resource_version() != stored_version {
            return Err(StoreError::Conflict(format!(
                "{name}: resourceVersion {:?} is stale (current {:?})",
                object.resource_version(),
                stored_version
            )));
        }
        Ok((k, stored))
    }

    fn finish_write(inner: &mut Inner, k: Key) -> Result<K, StoreError> {
        let version = Self::next_version(inner);
        let remove = {
            let stored = inner
                .objects
                .get_mut(&k)
                .ok_or_else(|| StoreError::NotFound(k.1.clone()))?;
            stored["metadata"]["resourceVersion"] = json!(version);
            is_deleting(stored) && finalizers_empty(stored)
        };
        let value = if remove {
            inner.objects.remove(&k)
        } else {
            inner.objects.get(&k).cloned()
        }
        .ok_or_else(|| StoreError::NotFound(k.1.clone()))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait::async_trait]
impl<K> ResourceStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        let inner = self.inner.lock().unwrap();
        match inner.objects.get(&key(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .map(|(_, value)| serde_json::from_value(value.clone()).map_err(StoreError::from))
            .collect()
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("object has no name".to_string()))?;
        let k = key(object.namespace().as_deref(), &name);
        if inner.objects.contains_key(&k) {
            return Err(StoreError::AlreadyExists(name));
        }

        let mut value = serde_json::to_value(object)?;
        let version = Self::next_version(&mut inner);
        let metadata = &mut value["metadata"];
        metadata["resourceVersion"] = json!(version);
        metadata["generation"] = json!(1);
        metadata["creationTimestamp"] = json!(now_rfc3339());
        if metadata.get("uid").is_none_or(Value::is_null) {
            metadata["uid"] = json!(uuid::Uuid::new_v4().to_string());
        }
        if let Some(map) = metadata.as_object_mut() {
            map.remove("deletionTimestamp");
        }
        inner.objects.insert(k, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_conflict(&mut inner) {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }
        let incoming = serde_json::to_value(object)?;
        let (k, stored) = Self::current(&mut inner, object)?;

        let spec_changed = stored.get("spec") != incoming.get("spec");
        let generation = stored
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);

        let mut updated = incoming;
        // Server-owned fields survive a replace
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match stored.pointer(&format!("/metadata/{field}")) {
                Some(value) => updated["metadata"][field] = value.clone(),
                None => {
                    if let Some(map) = updated["metadata"].as_object_mut() {
                        map.remove(field);
                    }
                }
            }
        }
        updated["metadata"]["generation"] =
            json!(if spec_changed { generation + 1 } else { generation });
        match stored.get("status") {
            Some(status) => updated["status"] = status.clone(),
            None => {
                if let Some(map) = updated.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        *stored = updated;
        Self::finish_write(&mut inner, k)
    }

    async fn replace_status(&self, object: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_conflict(&mut inner) {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }
        let incoming = serde_json::to_value(object)?;
        let (k, stored) = Self::current(&mut inner, object)?;
        stored["status"] = incoming.get("status").cloned().unwrap_or(Value::Null);
        Self::finish_write(&mut inner, k)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let k = key(namespace, name);
        let Some(stored) = inner.objects.get_mut(&k) else {
            return Ok(());
        };
        if finalizers_empty(stored) {
            inner.objects.remove(&k);
            return Ok(());
        }
        if !is_deleting(stored) {
            stored["metadata"]["deletionTimestamp"] = json!(now_rfc3339());
            let version = Self::next_version(&mut inner);
            if let Some(stored) = inner.objects.get_mut(&k) {
                stored["metadata"]["resourceVersion"] = json!(version);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create(&config_map("cm")).await.unwrap();

        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        store.replace(&first).await.unwrap();

        let mut stale = created;
        stale.data = Some(BTreeMap::from([("a".to_string(), "2".to_string())]));
        let err = store.replace(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_finalizer_defers_removal() {
        let store = MemoryStore::<ConfigMap>::new();
        let mut cm = config_map("cm");
        cm.metadata.finalizers = Some(vec!["example.com/protect".to_string()]);
        store.create(&cm).await.unwrap();

        store.delete(Some("default"), "cm").await.unwrap();
        let pending = store.get(Some("default"), "cm").await.unwrap().unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        let mut released = pending;
        released.metadata.finalizers = Some(Vec::new());
        store.replace(&released).await.unwrap();
        assert!(!store.contains(Some("default"), "cm"));
    }

    #[tokio::test]
    async fn test_injected_conflict() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create(&config_map("cm")).await.unwrap();
        store.inject_conflicts(1);
        assert!(store.replace(&created).await.unwrap_err().is_conflict());
        assert!(store.replace(&created).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemoryStore::<ConfigMap>::new();
        store.delete(Some("default"), "missing").await.unwrap();
    }
}
