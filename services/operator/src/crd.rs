//! `MinecraftServer` custom resource.
//!
//! `spec` is owned by users; the operator only reads it and writes the
//! status subresource.

use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of one Minecraft server.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "manager.kubestro.io",
    version = "v1",
    kind = "MinecraftServer",
    namespaced,
    shortname = "mcs",
    status = "MinecraftServerStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.minecraftVersion"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerSpec {
    /// The EULA must be accepted for the server to boot.
    pub eula: EulaAcceptance,

    /// Minecraft version, or one of the sentinels `latest` / `snapshot`.
    #[serde(default = "default_version")]
    pub minecraft_version: String,

    /// Server runtime flavor.
    #[serde(default, rename = "type")]
    pub server_type: ServerType,

    /// Whether the allow-list is enforced.
    #[serde(default)]
    pub access_mode: AccessMode,

    /// Players allowed to join in `AllowListOnly` mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_list: Vec<Player>,

    /// Players with operator permissions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops_list: Vec<Player>,

    /// World storage and seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldSpec>,

    /// Message of the day.
    #[serde(default)]
    pub motd: String,

    /// Default game mode for joining players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<GameMode>,

    /// Maximum number of concurrent players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<i32>,

    /// Chunk view distance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_distance: Option<i32>,

    /// How the server is exposed outside its pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    /// Vanilla Tweaks datapacks installed into the world.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vanilla_tweaks: Option<VanillaTweaks>,

    /// Prometheus monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

fn default_version() -> String {
    "latest".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EulaAcceptance {
    Accepted,
    NotAccepted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ServerType {
    #[default]
    Vanilla,
    Paper,
    Forge,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Vanilla => "Vanilla",
            Self::Paper => "Paper",
            Self::Forge => "Forge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AccessMode {
    Public,
    #[default]
    AllowListOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    /// Value used in `server.properties`.
    pub fn as_property(&self) -> &'static str {
        match self {
            Self::Survival => "survival",
            Self::Creative => "creative",
            Self::Adventure => "adventure",
            Self::Spectator => "spectator",
        }
    }
}

/// A player, identified by name and/or UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Player {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

/// World regions backed by persistent volume claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorldSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overworld: Option<PersistentVolumeClaimVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nether: Option<PersistentVolumeClaimVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_end: Option<PersistentVolumeClaimVolumeSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VanillaTweaks {
    #[serde(default)]
    pub datapacks: Vec<Datapack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Datapack {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MonitoringType {
    Disabled,
    PrometheusServiceMonitor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MonitoringSpec {
    #[serde(rename = "type")]
    pub monitoring_type: MonitoringType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ServiceType {
    #[default]
    None,
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    /// Kubernetes service type, or `None` when no service should exist.
    pub fn as_kube(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::ClusterIP => Some("ClusterIP"),
            Self::NodePort => Some("NodePort"),
            Self::LoadBalancer => Some("LoadBalancer"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type")]
    pub service_type: ServiceType,

    /// Node port for the game port (NodePort / LoadBalancer only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_node_port: Option<i32>,
}

/// Coarse lifecycle state reported in the status subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ServerState {
    Pending,
    Running,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServerState>,

    /// Last error, when `state` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 time of the last state change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl MinecraftServerSpec {
    /// True when the EULA has been explicitly accepted.
    pub fn eula_accepted(&self) -> bool {
        self.eula == EulaAcceptance::Accepted
    }

    /// True when monitoring is requested.
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring
            .as_ref()
            .is_some_and(|m| m.monitoring_type == MonitoringType::PrometheusServiceMonitor)
    }

    /// Service type to expose, `None` when no primary service should exist.
    pub fn exposure(&self) -> Option<&ServiceSpec> {
        self.service
            .as_ref()
            .filter(|s| s.service_type != ServiceType::None)
    }

    /// Selected datapacks as `(category, name)` pairs.
    pub fn datapacks(&self) -> Vec<(&str, &str)> {
        self.vanilla_tweaks
            .as_ref()
            .map(|vt| {
                vt.datapacks
                    .iter()
                    .map(|d| (d.category.as_str(), d.name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
