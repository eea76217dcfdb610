//! Kubestro Minecraft server operator.
//!
//! Converges the objects backing each `MinecraftServer` custom resource:
//!
//! - **ConfigMap**: rendered server configuration files
//! - **Service**: the game port, when exposure is requested
//! - **RCON Service**: the remote console port, always present
//! - **ReplicaSet**: one server pod, shaped by the server's flavor
//!
//! Every owned object carries an owner reference to its server, so deleting
//! the server garbage-collects them.

pub mod config;
pub mod controller;
pub mod crd;
pub mod kube_store;
pub mod render;
pub mod resources;
pub mod template;

pub use controller::{OwnedObject, ReconcileError, ReconcileOutcome, Reconciler};
pub use crd::{MinecraftServer, MinecraftServerSpec, MinecraftServerStatus, ServerState};

#[cfg(test)]
pub(crate) mod test_support {
    use kube::api::ObjectMeta;

    use crate::crd::MinecraftServer;

    /// A persisted server in namespace `games`.
    pub fn server(name: &str, spec: serde_json::Value) -> MinecraftServer {
        MinecraftServer {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("games".to_string()),
                uid: Some(format!("uid-{name}")),
                ..Default::default()
            },
            spec: serde_json::from_value(spec).unwrap(),
            status: None,
        }
    }
}
