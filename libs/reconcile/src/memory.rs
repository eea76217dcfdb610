//! In-memory object store for testing and development.
//!
//! Objects are kept as JSON keyed by (kind, namespace, name). Every write
//! bumps a global resource version, and replacements are rejected when the
//! caller's resource version is stale, mirroring the cluster's optimistic
//! concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::store::{ObjectStore, StoreError, StoredObject};

type Key = (String, String, String);

/// Object store backed by a map, with a write counter for assertions.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, serde_json::Value>>,
    resource_version: AtomicU64,
    writes: AtomicU64,
    uid_counter: AtomicU64,
}

fn key<K: StoredObject>(namespace: &str, name: &str) -> Key {
    (
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn object_key<K: StoredObject>(obj: &K) -> Key {
    let meta = obj.meta();
    key::<K>(
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or_default(),
    )
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object directly, bypassing write accounting.
    ///
    /// Assigns a uid and resource version when missing. Returns the stored copy.
    pub fn insert<K: StoredObject>(&self, mut obj: K) -> K {
        self.stamp(&mut obj, true);
        match serde_json::to_value(&obj) {
            Ok(value) => {
                self.lock().insert(object_key(&obj), value);
            }
            Err(e) => warn!(error = %e, "memory store: object does not serialize, not inserted"),
        }
        obj
    }

    /// Read an object without going through the async interface.
    pub fn peek<K: StoredObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .get(&key::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Number of create/replace/delete/status writes performed through the store.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of objects currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, serde_json::Value>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stamp<K: StoredObject>(&self, obj: &mut K, assign_uid: bool) {
        let rv = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.to_string());
        if meta.namespace.is_none() {
            meta.namespace = Some("default".to_string());
        }
        if assign_uid && meta.uid.is_none() {
            let n = self.uid_counter.fetch_add(1, Ordering::SeqCst) + 1;
            meta.uid = Some(format!("00000000-0000-0000-0000-{n:012}"));
        }
    }

    fn not_found(key: Key) -> StoreError {
        let (kind, namespace, name) = key;
        StoreError::NotFound {
            kind,
            namespace,
            name,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        match self.lock().get(&key::<K>(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError> {
        let key = object_key(obj);
        let mut objects = self.lock();
        if objects.contains_key(&key) {
            let (kind, namespace, name) = key;
            return Err(StoreError::AlreadyExists {
                kind,
                namespace,
                name,
            });
        }

        let mut obj = obj.clone();
        obj.meta_mut().resource_version = None;
        self.stamp(&mut obj, true);
        debug!(kind = %key.0, namespace = %key.1, name = %key.2, "memory store: create");
        objects.insert(key, serde_json::to_value(&obj)?);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError> {
        let key = object_key(obj);
        let mut objects = self.lock();
        let Some(current) = objects.get(&key) else {
            return Err(Self::not_found(key));
        };

        let current_rv = current
            .pointer("/metadata/resourceVersion")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if obj.meta().resource_version != current_rv {
            let (kind, namespace, name) = key;
            return Err(StoreError::Conflict {
                kind,
                namespace,
                name,
            });
        }

        let mut obj = obj.clone();
        self.stamp(&mut obj, false);
        debug!(kind = %key.0, namespace = %key.1, name = %key.2, "memory store: replace");
        objects.insert(key, serde_json::to_value(&obj)?);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = key::<K>(namespace, name);
        if self.lock().remove(&key).is_none() {
            return Err(Self::not_found(key));
        }
        debug!(kind = %key.0, namespace = %key.1, name = %key.2, "memory store: delete");
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn patch_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let key = key::<K>(namespace, name);
        let rv = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut objects = self.lock();
        let Some(current) = objects.get_mut(&key) else {
            return Err(Self::not_found(key));
        };

        let merged = match (current.get("status").cloned(), status) {
            (Some(serde_json::Value::Object(mut base)), serde_json::Value::Object(patch)) => {
                for (k, v) in patch {
                    if v.is_null() {
                        base.remove(&k);
                    } else {
                        base.insert(k, v);
                    }
                }
                serde_json::Value::Object(base)
            }
            (_, patch) => patch,
        };
        current["status"] = merged;
        current["metadata"]["resourceVersion"] = serde_json::Value::String(rv.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("games".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryStore::new();
        store.create(&config_map("a")).await.unwrap();

        let got: ConfigMap = store.get("games", "a").await.unwrap().unwrap();
        assert!(got.metadata.uid.is_some());
        assert!(got.metadata.resource_version.is_some());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_create_existing_rejected() {
        let store = MemoryStore::new();
        store.insert(config_map("a"));

        let err = store.create(&config_map("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let store = MemoryStore::new();
        let stored = store.insert(config_map("a"));

        let mut first = stored.clone();
        first.data = Some([("k".to_string(), "1".to_string())].into());
        store.replace(&first).await.unwrap();

        let mut second = stored;
        second.data = Some([("k".to_string(), "2".to_string())].into());
        let err = store.replace(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        let got: Option<ConfigMap> = store.get("games", "nope").await.unwrap();
        assert!(got.is_none());
    }
}
