//! Pod templates per server flavor.
//!
//! A [`FlavorStrategy`] resolves the server jar and contributes the
//! flavor-specific part of the pod (java arguments, world volumes, extra
//! directories). [`PodTemplateBuilder`] owns everything shared: the main
//! container, the download and config-copy init steps, the optional
//! datapack install and the security context on every container.

mod forge;
mod paper;
mod vanilla;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SecurityContext, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kubestro_resolver::{DatapackResolver, ResolveError, ResolvedArtifact, VersionResolver};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crd::{MinecraftServer, MinecraftServerSpec, ServerType};
use crate::resources::{pod_labels, MINECRAFT_PORT};

pub use forge::ForgeStrategy;
pub use paper::PaperStrategy;
pub use vanilla::VanillaStrategy;

pub const JAR_VOLUME: &str = "minecraft-jar";
pub const WORKING_DIR_VOLUME: &str = "minecraft-workingdir";
pub const DATAPACKS_VOLUME: &str = "data-packs";
pub const CONFIG_VOLUME: &str = "config";

pub const JAR_DIR: &str = "/usr/local/minecraft";
pub const WORKING_DIR: &str = "/run/minecraft";
pub const WORLD_ROOT: &str = "/var/minecraft";
pub const DATAPACKS_DIR: &str = "/var/minecraft/world/datapacks";
pub const CONFIG_DIR: &str = "/etc/minecraft";

const DOWNLOAD_DIR: &str = "/download";
const UTILITY_IMAGE: &str = "busybox";
const RUN_AS: i64 = 1000;

/// Errors building a pod template.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("server type {0} is not supported yet")]
    UnsupportedFlavor(ServerType),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// The flavor-specific part of a server pod.
#[derive(Debug, Clone)]
pub struct FlavorLayout {
    /// Resolved server jar.
    pub artifact: ResolvedArtifact,

    /// File name of the jar under [`JAR_DIR`].
    pub jar_name: &'static str,

    /// Main container arguments.
    pub args: Vec<String>,

    /// Extra pod volumes.
    pub volumes: Vec<Volume>,

    /// Extra main container mounts.
    pub mounts: Vec<VolumeMount>,
}

/// One server flavor.
#[async_trait]
pub trait FlavorStrategy: Send + Sync {
    /// Resolve the jar and lay out the flavor's pod.
    ///
    /// `Ok(None)` means the flavor cannot be built yet.
    async fn layout(
        &self,
        spec: &MinecraftServerSpec,
    ) -> Result<Option<FlavorLayout>, ResolveError>;
}

/// Builds pod templates for every flavor.
pub struct PodTemplateBuilder {
    vanilla: VanillaStrategy,
    paper: PaperStrategy,
    forge: ForgeStrategy,
    datapacks: DatapackResolver,
    downloader_image: String,
}

impl PodTemplateBuilder {
    pub fn new(
        vanilla: Arc<dyn VersionResolver>,
        paper: Arc<dyn VersionResolver>,
        datapacks: DatapackResolver,
        downloader_image: impl Into<String>,
    ) -> Self {
        Self {
            vanilla: VanillaStrategy::new(vanilla),
            paper: PaperStrategy::new(paper),
            forge: ForgeStrategy,
            datapacks,
            downloader_image: downloader_image.into(),
        }
    }

    fn strategy(&self, server_type: ServerType) -> &dyn FlavorStrategy {
        match server_type {
            ServerType::Vanilla => &self.vanilla,
            ServerType::Paper => &self.paper,
            ServerType::Forge => &self.forge,
        }
    }

    /// Build the pod template for `server`.
    ///
    /// Any resolver failure aborts the build; no partial template is returned.
    #[instrument(
        skip(self, server),
        fields(server = %server.name_any(), flavor = %server.spec.server_type)
    )]
    pub async fn build(&self, server: &MinecraftServer) -> Result<PodTemplateSpec, BuildError> {
        let spec = &server.spec;
        let layout = self
            .strategy(spec.server_type)
            .layout(spec)
            .await?
            .ok_or(BuildError::UnsupportedFlavor(spec.server_type))?;

        let mut init_containers = vec![
            self.download_container(&layout.artifact, layout.jar_name),
            copy_config_container(),
        ];

        let packs = spec.datapacks();
        if !packs.is_empty() {
            let url = self
                .datapacks
                .archive_url(&layout.artifact.version, packs)
                .await?;
            init_containers.push(install_datapacks_container(&url));
        }

        let mut main = main_container(layout.artifact.java_major);
        main.args = Some(layout.args);
        main.volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(layout.mounts);

        let mut volumes = vec![
            empty_dir(JAR_VOLUME),
            empty_dir(WORKING_DIR_VOLUME),
            empty_dir(DATAPACKS_VOLUME),
            config_volume(&server.name_any()),
        ];
        volumes.extend(layout.volumes);

        let mut containers = vec![main];
        for container in init_containers.iter_mut().chain(containers.iter_mut()) {
            container.security_context = Some(security_context());
        }

        debug!(
            version = %layout.artifact.version,
            java = layout.artifact.java_major,
            init_containers = init_containers.len(),
            "Built pod template"
        );

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels(&server.name_any())),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(init_containers),
                containers,
                volumes: Some(volumes),
                ..Default::default()
            }),
        })
    }

    fn download_container(&self, artifact: &ResolvedArtifact, file_name: &str) -> Container {
        Container {
            name: format!("download-{}", file_name.replace('.', "-")),
            image: Some(self.downloader_image.clone()),
            image_pull_policy: Some("Always".to_string()),
            args: Some(vec![
                "downloader".to_string(),
                "--url".to_string(),
                artifact.url.clone(),
                "--target".to_string(),
                format!("{DOWNLOAD_DIR}/{file_name}"),
                "--hash-type".to_string(),
                artifact.digest.algorithm().as_str().to_string(),
                "--hash".to_string(),
                artifact.digest.hex().to_string(),
            ]),
            volume_mounts: Some(vec![mount(JAR_VOLUME, DOWNLOAD_DIR)]),
            ..Default::default()
        }
    }
}

/// Java arguments shared by every flavor: run `jar_name` from [`JAR_DIR`].
pub fn java_args(jar_name: &str, flags: &[&str]) -> Vec<String> {
    let mut args = vec![
        "java".to_string(),
        "-jar".to_string(),
        format!("{JAR_DIR}/{jar_name}"),
    ];
    args.extend(flags.iter().map(|f| f.to_string()));
    args
}

/// A world region volume: the claim when one is given, scratch space otherwise.
pub fn region_volume(name: &str, claim: Option<&PersistentVolumeClaimVolumeSource>) -> Volume {
    match claim {
        Some(claim) => Volume {
            name: name.to_string(),
            persistent_volume_claim: Some(claim.clone()),
            ..Default::default()
        },
        None => empty_dir(name),
    }
}

pub fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

pub fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn config_volume(config_map: &str) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn security_context() -> SecurityContext {
    SecurityContext {
        privileged: Some(false),
        run_as_user: Some(RUN_AS),
        run_as_group: Some(RUN_AS),
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    }
}

fn tcp_probe(period_seconds: Option<i32>) -> Probe {
    Probe {
        initial_delay_seconds: Some(10),
        period_seconds,
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(MINECRAFT_PORT),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn main_container(java_major: u32) -> Container {
    // No cpu limit: throttling makes tick times unstable.
    let resources = ResourceRequirements {
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("2Gi".to_string()),
        )])),
        requests: Some(BTreeMap::from([
            ("memory".to_string(), Quantity("1Gi".to_string())),
            ("cpu".to_string(), Quantity("2".to_string())),
        ])),
        ..Default::default()
    };

    Container {
        name: "minecraft".to_string(),
        image: Some(format!("eclipse-temurin:{java_major}")),
        working_dir: Some(WORKING_DIR.to_string()),
        resources: Some(resources),
        tty: Some(true),
        stdin: Some(true),
        ports: Some(vec![ContainerPort {
            name: Some("minecraft".to_string()),
            container_port: MINECRAFT_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        startup_probe: Some(tcp_probe(None)),
        readiness_probe: Some(tcp_probe(None)),
        liveness_probe: Some(tcp_probe(Some(20))),
        volume_mounts: Some(vec![
            mount(WORKING_DIR_VOLUME, WORKING_DIR),
            mount(JAR_VOLUME, JAR_DIR),
            mount(DATAPACKS_VOLUME, DATAPACKS_DIR),
            mount(CONFIG_VOLUME, CONFIG_DIR),
        ]),
        ..Default::default()
    }
}

/// The server rewrites its own config files, so they are copied out of the
/// read-only ConfigMap mount into the working directory.
fn copy_config_container() -> Container {
    Container {
        name: "copy-config".to_string(),
        image: Some(UTILITY_IMAGE.to_string()),
        args: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp {CONFIG_DIR}/* {WORKING_DIR}/"),
        ]),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, CONFIG_DIR),
            mount(WORKING_DIR_VOLUME, WORKING_DIR),
        ]),
        ..Default::default()
    }
}

/// The archive URL is the script's `$1`, never part of the script text.
fn install_datapacks_container(archive_url: &str) -> Container {
    Container {
        name: "install-vanillatweaks".to_string(),
        image: Some(UTILITY_IMAGE.to_string()),
        args: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cd {DATAPACKS_DIR} && wget -O vt.zip \"$1\" && unzip vt.zip && rm vt.zip"),
            "--".to_string(),
            archive_url.to_string(),
        ]),
        volume_mounts: Some(vec![mount(DATAPACKS_VOLUME, DATAPACKS_DIR)]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_args() {
        assert_eq!(
            java_args("minecraft.jar", &["--nogui"]),
            vec!["java", "-jar", "/usr/local/minecraft/minecraft.jar", "--nogui"]
        );
    }

    #[test]
    fn test_region_volume() {
        let claim = PersistentVolumeClaimVolumeSource {
            claim_name: "lobby-world".to_string(),
            read_only: None,
        };

        let persistent = region_volume("world", Some(&claim));
        assert_eq!(persistent.persistent_volume_claim, Some(claim));
        assert!(persistent.empty_dir.is_none());

        let scratch = region_volume("world", None);
        assert!(scratch.persistent_volume_claim.is_none());
        assert!(scratch.empty_dir.is_some());
    }

    #[test]
    fn test_main_container_shape() {
        let main = main_container(21);

        assert_eq!(main.image.as_deref(), Some("eclipse-temurin:21"));
        assert_eq!(main.working_dir.as_deref(), Some(WORKING_DIR));
        let resources = main.resources.unwrap();
        assert!(!resources.limits.unwrap().contains_key("cpu"));
        assert_eq!(resources.requests.unwrap()["cpu"], Quantity("2".to_string()));
        assert_eq!(main.liveness_probe.unwrap().period_seconds, Some(20));
        assert_eq!(main.readiness_probe.unwrap().initial_delay_seconds, Some(10));
    }

    #[test]
    fn test_install_datapacks_passes_url_as_argument() {
        let url = "https://vt.example/d.zip'; touch /tmp/owned; echo '";
        let args = install_datapacks_container(url).args.unwrap();

        assert_eq!(
            args[2],
            "cd /var/minecraft/world/datapacks && wget -O vt.zip \"$1\" && unzip vt.zip && rm vt.zip"
        );
        assert_eq!(args[3], "--");
        assert_eq!(args[4], url);
        assert!(!args[2].contains("vt.example"));
    }
}
