//! Reconciliation driver.
//!
//! One call converges one server by at most one write: the owned objects
//! are synchronized in a fixed order and the call returns at the first
//! object that changed. The caller re-invokes until a pass converges.
//!
//! Order: ConfigMap, game Service, RCON Service, ReplicaSet. The ConfigMap
//! comes first because the pod template mounts it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use kubestro_reconcile::{sync, ObjectStore, StoreError, StoreOp, SyncError, SyncOutcome};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::crd::{MinecraftServer, ServerState};
use crate::kube_store::KubeStore;
use crate::render::{ConfigRenderer, RenderError};
use crate::resources::{
    desired_config_map, desired_rcon_service, desired_replica_set, desired_service,
    owner_reference, rcon_service_name, ConfigMapKind, ReplicaSetKind, ServiceKind,
};
use crate::template::{BuildError, PodTemplateBuilder};

/// Requeue delay after a pass that changed something.
const CHANGED_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load MinecraftServer {namespace}/{name}: {source}")]
    Load {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("MinecraftServer {0} has no uid")]
    MissingUid(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// An object owned by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedObject {
    ConfigMap,
    Service,
    RconService,
    ReplicaSet,
}

impl fmt::Display for OwnedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::RconService => "RCON Service",
            Self::ReplicaSet => "ReplicaSet",
        };
        f.write_str(name)
    }
}

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The server no longer exists. Owned objects are garbage collected.
    NotFound,

    /// One object was written; call again.
    Changed {
        object: OwnedObject,
        outcome: SyncOutcome,
    },

    /// Every owned object matches.
    Converged { state: ServerState },
}

impl ReconcileOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Converges servers through an injected store.
pub struct Reconciler<S> {
    store: S,
    renderer: ConfigRenderer,
    builder: PodTemplateBuilder,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S, renderer: ConfigRenderer, builder: PodTemplateBuilder) -> Self {
        Self {
            store,
            renderer,
            builder,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one pass for the server `namespace/name`.
    ///
    /// On failure the server's status is set to `Error` (best effort) and
    /// the failure is returned unchanged.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let server = self
            .store
            .get::<MinecraftServer>(namespace, name)
            .await
            .map_err(|source| ReconcileError::Load {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        let Some(server) = server else {
            debug!("MinecraftServer not found, nothing to do");
            return Ok(ReconcileOutcome::NotFound);
        };

        match self.converge(&server, namespace, name).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_error(&server, namespace, name, &e).await;
                Err(e)
            }
        }
    }

    async fn converge(
        &self,
        server: &MinecraftServer,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let owner = owner_reference(server)
            .ok_or_else(|| ReconcileError::MissingUid(name.to_string()))?;

        let config_map = desired_config_map(server, &self.renderer)?;
        let outcome =
            sync::<ConfigMapKind, _>(&self.store, &owner, namespace, name, Some(config_map)).await?;
        if let Some(changed) = changed(OwnedObject::ConfigMap, outcome) {
            return Ok(changed);
        }

        let service = desired_service(server);
        let outcome = sync::<ServiceKind, _>(&self.store, &owner, namespace, name, service).await?;
        if let Some(changed) = changed(OwnedObject::Service, outcome) {
            return Ok(changed);
        }

        let rcon = desired_rcon_service(server);
        let rcon_name = rcon_service_name(name);
        let outcome =
            sync::<ServiceKind, _>(&self.store, &owner, namespace, &rcon_name, Some(rcon)).await?;
        if let Some(changed) = changed(OwnedObject::RconService, outcome) {
            return Ok(changed);
        }

        let template = self.builder.build(server).await?;
        let replica_set = desired_replica_set(server, template);
        let outcome =
            sync::<ReplicaSetKind, _>(&self.store, &owner, namespace, name, Some(replica_set))
                .await?;
        if let Some(changed) = changed(OwnedObject::ReplicaSet, outcome) {
            return Ok(changed);
        }

        let state = self.observe_state(namespace, name).await?;
        self.write_state(server, namespace, name, state, None).await;
        Ok(ReconcileOutcome::Converged { state })
    }

    /// `Running` once the ReplicaSet reports a ready replica.
    async fn observe_state(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServerState, ReconcileError> {
        let replica_set = self
            .store
            .get::<ReplicaSet>(namespace, name)
            .await
            .map_err(|source| SyncError::Store {
                op: StoreOp::Get,
                kind: "ReplicaSet".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        let ready = replica_set
            .and_then(|rs| rs.status)
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);

        Ok(if ready >= 1 {
            ServerState::Running
        } else {
            ServerState::Pending
        })
    }

    async fn record_error(
        &self,
        server: &MinecraftServer,
        namespace: &str,
        name: &str,
        err: &ReconcileError,
    ) {
        warn!(error = %err, "Reconcile failed");
        self.write_state(server, namespace, name, ServerState::Error, Some(err.to_string()))
            .await;
    }

    /// Write the status when it differs from what the server reports.
    /// Failures are logged, never returned.
    async fn write_state(
        &self,
        server: &MinecraftServer,
        namespace: &str,
        name: &str,
        state: ServerState,
        message: Option<String>,
    ) {
        let current = server.status.clone().unwrap_or_default();
        if current.state == Some(state) && current.message == message {
            return;
        }

        let patch = json!({
            "state": state,
            "message": message,
            "lastTransitionTime": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });

        match self
            .store
            .patch_status::<MinecraftServer>(namespace, name, patch)
            .await
        {
            Ok(()) => info!(state = ?state, "Updated MinecraftServer status"),
            Err(e) => warn!(error = %e, state = ?state, "Failed to update MinecraftServer status"),
        }
    }
}

fn changed(object: OwnedObject, outcome: SyncOutcome) -> Option<ReconcileOutcome> {
    outcome
        .is_changed()
        .then_some(ReconcileOutcome::Changed { object, outcome })
}

/// Shared state of the watch loop.
struct Context {
    reconciler: Reconciler<KubeStore>,
    resync_interval: Duration,
    error_requeue: Duration,
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watch servers and the objects they own until shutdown.
pub async fn run(client: Client, config: &Config, reconciler: Reconciler<KubeStore>) {
    let namespace = config.namespace.as_deref();
    let servers = scoped::<MinecraftServer>(&client, namespace);

    let context = Arc::new(Context {
        reconciler,
        resync_interval: config.resync_interval,
        error_requeue: config.error_requeue,
    });

    info!(
        namespace = namespace.unwrap_or("*"),
        resync_interval_secs = config.resync_interval.as_secs(),
        "Starting MinecraftServer controller"
    );

    Controller::new(servers, watcher::Config::default())
        .owns(scoped::<ConfigMap>(&client, namespace), watcher::Config::default())
        .owns(scoped::<Service>(&client, namespace), watcher::Config::default())
        .owns(scoped::<ReplicaSet>(&client, namespace), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_server, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(server = %object.name, ?action, "Reconciled"),
                Err(e) => warn!(error = %e, "Controller error"),
            }
        })
        .await;

    info!("Controller shut down");
}

async fn reconcile_server(
    server: Arc<MinecraftServer>,
    context: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = server.namespace().unwrap_or_default();
    let name = server.name_any();

    let action = match context.reconciler.reconcile(&namespace, &name).await? {
        ReconcileOutcome::NotFound => Action::await_change(),
        ReconcileOutcome::Changed { object, outcome } => {
            info!(%namespace, %name, %object, %outcome, "Changed owned object");
            Action::requeue(CHANGED_REQUEUE)
        }
        ReconcileOutcome::Converged { state } => {
            debug!(%namespace, %name, ?state, "Converged");
            Action::requeue(context.resync_interval)
        }
    };
    Ok(action)
}

fn error_policy(
    server: Arc<MinecraftServer>,
    err: &ReconcileError,
    context: Arc<Context>,
) -> Action {
    warn!(server = %server.name_any(), error = %err, "Requeueing after error");
    Action::requeue(context.error_requeue)
}
