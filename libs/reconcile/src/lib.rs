//! Convergence primitive for owned cluster objects.
//!
//! This library provides the single "make this object match" step that the
//! operator applies to every object it manages. Key concepts:
//!
//! - **Desired state**: the object shape derived from the custom resource,
//!   or `None` when the object should not exist.
//! - **Observed state**: the stored counterpart, fetched by name.
//! - **Ownership marker**: an owner reference back to the custom resource.
//!
//! # Invariants
//!
//! - A sync performs at most one write (create, delete or replace)
//! - The ownership marker is checked before any other field
//! - Field comparison follows a fixed order and stops at the first mismatch
//! - Decisions are deterministic given the same desired and observed state

mod memory;
pub mod owner;
pub mod ports;
mod store;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use thiserror::Error;
use tracing::{debug, info};

pub use memory::MemoryStore;
pub use owner::{has_owner, set_owner};
pub use ports::correct_ports;
pub use store::{ObjectStore, StoreError, StoredObject};

/// Synchronization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store operation failed.
    #[error("failed to {op} {kind} {namespace}/{name}: {source}")]
    Store {
        op: StoreOp,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    /// The desired object has no name.
    #[error("desired {0} has no name")]
    Unnamed(String),
}

/// Store operation that failed, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Replace,
    Delete,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// What a single sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Observed state already matches.
    Unchanged,

    /// The object was missing and has been created.
    Created,

    /// The object should not exist and has been deleted.
    Deleted,

    /// The ownership marker was missing or stale and has been set.
    OwnerCorrected,

    /// One mutable field was corrected.
    Corrected(String),
}

impl SyncOutcome {
    /// Returns true if the sync wrote to the store.
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::Created => f.write_str("created"),
            Self::Deleted => f.write_str("deleted"),
            Self::OwnerCorrected => f.write_str("owner reference corrected"),
            Self::Corrected(field) => write!(f, "corrected {field}"),
        }
    }
}

/// Comparison rules for one object kind.
///
/// Implementations name the mutable fields the synchronizer is allowed to
/// touch, and the order they are checked in.
pub trait ObjectKind {
    /// The stored object type.
    type Object: StoredObject;

    /// Correct the first mutable field of `observed` that differs from `desired`.
    ///
    /// Returns a description of the corrected field, or `None` if every
    /// compared field matches. Must change at most one field per call.
    fn correct(observed: &mut Self::Object, desired: &Self::Object) -> Option<String>;
}

/// Converge one object toward its desired state with at most one write.
///
/// `desired == None` means the object must not exist. The ownership marker
/// `owner` is stamped on created objects and enforced on existing ones
/// before any field comparison.
pub async fn sync<K, S>(
    store: &S,
    owner: &OwnerReference,
    namespace: &str,
    name: &str,
    desired: Option<K::Object>,
) -> Result<SyncOutcome, SyncError>
where
    K: ObjectKind,
    S: ObjectStore,
{
    let kind = <K::Object as kube::Resource>::kind(&()).into_owned();
    let store_err = |op: StoreOp, source: StoreError| SyncError::Store {
        op,
        kind: kind.clone(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        source,
    };

    let observed = store
        .get::<K::Object>(namespace, name)
        .await
        .map_err(|e| store_err(StoreOp::Get, e))?;

    let (mut observed, desired) = match (observed, desired) {
        (None, None) => {
            debug!(%kind, %namespace, %name, "absent as desired");
            return Ok(SyncOutcome::Unchanged);
        }
        (Some(_), None) => {
            info!(%kind, %namespace, %name, "exists but should not, deleting");
            store
                .delete::<K::Object>(namespace, name)
                .await
                .map_err(|e| store_err(StoreOp::Delete, e))?;
            return Ok(SyncOutcome::Deleted);
        }
        (None, Some(mut desired)) => {
            let meta = kube::Resource::meta_mut(&mut desired);
            if meta.name.is_none() {
                return Err(SyncError::Unnamed(kind.clone()));
            }
            meta.namespace = Some(namespace.to_string());
            set_owner(meta, owner);
            info!(%kind, %namespace, %name, "does not exist, creating");
            store
                .create(&desired)
                .await
                .map_err(|e| store_err(StoreOp::Create, e))?;
            return Ok(SyncOutcome::Created);
        }
        (Some(observed), Some(desired)) => (observed, desired),
    };

    let meta = kube::Resource::meta_mut(&mut observed);
    if !has_owner(meta, owner) {
        info!(%kind, %namespace, %name, "owner reference incorrect, updating");
        set_owner(meta, owner);
        store
            .replace(&observed)
            .await
            .map_err(|e| store_err(StoreOp::Replace, e))?;
        return Ok(SyncOutcome::OwnerCorrected);
    }

    if let Some(field) = K::correct(&mut observed, &desired) {
        info!(%kind, %namespace, %name, %field, "field incorrect, updating");
        store
            .replace(&observed)
            .await
            .map_err(|e| store_err(StoreOp::Replace, e))?;
        return Ok(SyncOutcome::Corrected(field));
    }

    debug!(%kind, %namespace, %name, "OK");
    Ok(SyncOutcome::Unchanged)
}
