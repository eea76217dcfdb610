//! Object store interface.
//!
//! The store abstracts the cluster API primitives the synchronizer needs:
//! - Fetching an object by namespace and name
//! - Creating, replacing and deleting objects
//! - Writing the status of the owning object
//!
//! Writes are assumed atomic per object. Replacements carry the observed
//! resource version, so a concurrent modification surfaces as a conflict.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object to replace or delete does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The object to create already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The observed resource version is stale.
    #[error("conflict writing {kind} {namespace}/{name}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The object could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// A namespaced, statically typed cluster object the store can hold.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Get/create/replace/delete primitives over namespaced objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. Absence is `Ok(None)`, not an error.
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str)
        -> Result<Option<K>, StoreError>;

    /// Create a new object.
    async fn create<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError>;

    /// Replace an existing object (optimistic, resource-version checked).
    async fn replace<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError>;

    /// Delete an object.
    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str)
        -> Result<(), StoreError>;

    /// Merge `status` into the status subresource of an object.
    async fn patch_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError>;
}
