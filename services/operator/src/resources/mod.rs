//! Owned objects of a `MinecraftServer`.
//!
//! Each submodule produces the desired shape of one object kind and names
//! the fields the synchronizer may correct on it.

mod config_map;
mod replica_set;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::MinecraftServer;

pub use config_map::{desired_config_map, ConfigMapKind};
pub use replica_set::{desired_replica_set, ReplicaSetKind, REPLICAS};
pub use service::{
    desired_rcon_service, desired_service, rcon_service_name, ServiceKind, MINECRAFT_PORT,
    RCON_PORT,
};

/// Labels selecting the pods of one server.
pub fn pod_labels(server_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "minecraft".to_string()),
        ("minecraft".to_string(), server_name.to_string()),
    ])
}

/// Ownership marker pointing back at `server`.
///
/// `None` when the server has not been persisted yet (no uid).
pub fn owner_reference(server: &MinecraftServer) -> Option<OwnerReference> {
    server.controller_owner_ref(&())
}

/// Metadata for an owned object named `name` in the server's namespace.
fn owned_meta(server: &MinecraftServer, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: server.namespace(),
        labels: Some(pod_labels(&server.name_any())),
        ..Default::default()
    }
}
