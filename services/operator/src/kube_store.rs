//! Cluster-backed object store.

use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use kubestro_reconcile::{ObjectStore, StoreError, StoredObject};
use serde_json::json;

/// [`ObjectStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error<K: StoredObject>(namespace: &str, name: &str, err: kube::Error) -> StoreError {
    let kind = K::kind(&()).into_owned();
    let (namespace, name) = (namespace.to_string(), name.to_string());

    match err {
        kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
            kind,
            namespace,
            name,
        },
        kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace,
                name,
            }
        }
        kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
            kind,
            namespace,
            name,
        },
        other => StoreError::backend(other),
    }
}

fn identity<K: StoredObject>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error::<K>(namespace, name, e))
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = identity(obj);
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_error::<K>(&namespace, &name, e))?;
        Ok(())
    }

    async fn replace<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = identity(obj);
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_error::<K>(&namespace, &name, e))?;
        Ok(())
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_error::<K>(namespace, name, e))?;
        Ok(())
    }

    async fn patch_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await
            .map_err(|e| map_error::<K>(namespace, name, e))?;
        Ok(())
    }
}
