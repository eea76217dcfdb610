//! Reconciliation driver tests.
//!
//! The driver runs against the in-memory store, with the version manifest,
//! Paper API and Vanilla Tweaks faked over HTTP.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, PodSpec, Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use kubestro_operator::render::{ConfigRenderer, EULA, SERVER_PROPERTIES, WHITELIST};
use kubestro_operator::resources::owner_reference;
use kubestro_operator::template::{BuildError, PodTemplateBuilder};
use kubestro_operator::{
    MinecraftServer, OwnedObject, ReconcileError, ReconcileOutcome, Reconciler, ServerState,
};
use kubestro_reconcile::{has_owner, MemoryStore, SyncOutcome};
use kubestro_resolver::{BuildResolver, DatapackResolver, ManifestResolver, ResolveError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NS: &str = "games";
const SHA1: &str = "8dd1a28015f51b1803213892b50b7b4fc76e594d";
const SHA256: &str = "c6f5e5b5a8f1d1e8b1c2a9f3a4d0e6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3";

struct Harness {
    upstream: MockServer,
    reconciler: Reconciler<MemoryStore>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_datapacks(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "link": "/download/VanillaTweaks_abc.zip"
        })))
        .await
    }

    /// A harness whose Vanilla Tweaks endpoint answers with `datapacks`.
    async fn with_datapacks(datapacks: ResponseTemplate) -> Self {
        let upstream = MockServer::start().await;
        mount_upstream(&upstream, datapacks).await;

        let http = reqwest::Client::new();
        let manifest = ManifestResolver::new(
            http.clone(),
            format!("{}/mc/game/version_manifest_v2.json", upstream.uri()),
        );
        let paper = BuildResolver::new(
            http.clone(),
            format!("{}/v2", upstream.uri()),
            manifest.clone(),
        );
        let datapacks = DatapackResolver::new(http, upstream.uri());
        let builder = PodTemplateBuilder::new(
            Arc::new(manifest),
            Arc::new(paper),
            datapacks,
            "downloader:test",
        );

        let reconciler =
            Reconciler::new(MemoryStore::new(), ConfigRenderer::new("secret"), builder);
        Self {
            upstream,
            reconciler,
        }
    }

    fn store(&self) -> &MemoryStore {
        self.reconciler.store()
    }

    fn add_server(&self, name: &str, spec: serde_json::Value) -> MinecraftServer {
        let mut server = MinecraftServer::new(name, serde_json::from_value(spec).unwrap());
        server.metadata.namespace = Some(NS.to_string());
        self.store().insert(server)
    }

    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconciler.reconcile(NS, name).await
    }

    /// Reconcile until a pass converges, returning every changed outcome.
    async fn converge(&self, name: &str) -> (Vec<ReconcileOutcome>, ServerState) {
        let mut changes = Vec::new();
        for _ in 0..20 {
            match self.reconcile(name).await.unwrap() {
                ReconcileOutcome::Converged { state } => return (changes, state),
                ReconcileOutcome::NotFound => panic!("server {name} not found"),
                changed => changes.push(changed),
            }
        }
        panic!("server {name} did not converge: {changes:?}");
    }

    /// Reconcile until a pass fails, panicking if it converges instead.
    async fn first_error(&self, name: &str) -> ReconcileError {
        for _ in 0..20 {
            match self.reconcile(name).await {
                Ok(outcome) if outcome.is_changed() => {}
                Ok(outcome) => panic!("server {name} reconciled without error: {outcome:?}"),
                Err(e) => return e,
            }
        }
        panic!("server {name} kept changing");
    }

    fn pod_spec(&self, name: &str) -> PodSpec {
        let rs: ReplicaSet = self.store().peek(NS, name).expect("replica set");
        rs.spec.unwrap().template.unwrap().spec.unwrap()
    }

    fn config(&self, name: &str) -> std::collections::BTreeMap<String, String> {
        let cm: ConfigMap = self.store().peek(NS, name).expect("config map");
        cm.data.unwrap()
    }
}

async fn mount_upstream(server: &MockServer, datapacks: ResponseTemplate) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/mc/game/version_manifest_v2.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "latest": {"release": "1.20.4", "snapshot": "24w14a"},
            "versions": [
                {"id": "24w14a", "type": "snapshot", "url": format!("{base}/v1/packages/24w14a.json")},
                {"id": "1.20.4", "type": "release", "url": format!("{base}/v1/packages/1.20.4.json")},
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/packages/1.20.4.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "javaVersion": {"majorVersion": 17},
            "downloads": {"server": {"sha1": SHA1, "size": 49150256, "url": "https://jars.example/server.jar"}}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/projects/paper/versions/1.20.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"builds": [496, 497]})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/projects/paper/versions/1.20.4/builds/497"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "downloads": {"application": {"name": "paper-1.20.4-497.jar", "sha256": SHA256}}
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/assets/server/zipdatapacks.php"))
        .respond_with(datapacks)
        .mount(server)
        .await;
}

fn objects(changes: &[ReconcileOutcome]) -> Vec<OwnedObject> {
    changes
        .iter()
        .filter_map(|c| match c {
            ReconcileOutcome::Changed { object, .. } => Some(*object),
            _ => None,
        })
        .collect()
}

fn container_names(containers: &[k8s_openapi::api::core::v1::Container]) -> Vec<&str> {
    containers.iter().map(|c| c.name.as_str()).collect()
}

#[tokio::test]
async fn test_vanilla_server_converges() {
    let h = Harness::new().await;
    h.add_server(
        "lobby",
        json!({"eula": "Accepted", "type": "Vanilla", "minecraftVersion": "1.20.4"}),
    );

    let (changes, state) = h.converge("lobby").await;

    assert_eq!(
        objects(&changes),
        vec![OwnedObject::ConfigMap, OwnedObject::RconService, OwnedObject::ReplicaSet]
    );
    assert_eq!(state, ServerState::Pending);

    let config = h.config("lobby");
    assert_eq!(config[EULA], "eula=true");
    assert!(!config[SERVER_PROPERTIES].contains("motd"));

    let pod = h.pod_spec("lobby");
    assert_eq!(
        container_names(pod.init_containers.as_deref().unwrap()),
        vec!["download-minecraft-jar", "copy-config"]
    );
    let download = &pod.init_containers.as_ref().unwrap()[0];
    assert_eq!(
        download.args.clone().unwrap(),
        vec![
            "downloader",
            "--url",
            "https://jars.example/server.jar",
            "--target",
            "/download/minecraft.jar",
            "--hash-type",
            "sha1",
            "--hash",
            SHA1,
        ]
    );
    assert_eq!(download.image.as_deref(), Some("downloader:test"));

    let main = &pod.containers[0];
    assert_eq!(main.image.as_deref(), Some("eclipse-temurin:17"));
    assert_eq!(
        main.args.clone().unwrap(),
        vec![
            "java",
            "-jar",
            "/usr/local/minecraft/minecraft.jar",
            "--universe=/var/minecraft",
            "--nogui"
        ]
    );
    for container in pod.init_containers.iter().flatten().chain(&pod.containers) {
        let sc = container.security_context.as_ref().expect("security context");
        assert_eq!(sc.run_as_non_root, Some(true));
        assert_eq!(sc.read_only_root_filesystem, Some(true));
        assert_eq!(sc.allow_privilege_escalation, Some(false));
    }

    let world = pod
        .volumes
        .unwrap()
        .into_iter()
        .find(|v| v.name == "world")
        .unwrap();
    assert!(world.empty_dir.is_some());
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let h = Harness::new().await;
    h.add_server("lobby", json!({"eula": "Accepted"}));
    h.converge("lobby").await;

    let writes = h.store().writes();
    let outcome = h.reconcile("lobby").await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Converged { state: ServerState::Pending });
    assert_eq!(h.store().writes(), writes);
}

#[tokio::test]
async fn test_paper_server_with_allow_list() {
    let h = Harness::new().await;
    h.add_server(
        "survival",
        json!({
            "eula": "Accepted",
            "type": "Paper",
            "minecraftVersion": "latest",
            "accessMode": "AllowListOnly",
            "allowList": [{"name": "Alice"}]
        }),
    );

    h.converge("survival").await;

    let config = h.config("survival");
    assert_eq!(config[WHITELIST], r#"[{"name":"Alice"}]"#);
    assert!(config[SERVER_PROPERTIES].contains("enforce-whitelist=true\n"));
    assert!(config[SERVER_PROPERTIES].contains("white-list=true\n"));

    let pod = h.pod_spec("survival");
    let download = &pod.init_containers.as_ref().unwrap()[0];
    assert_eq!(download.name, "download-paper-jar");
    let args = download.args.clone().unwrap();
    assert_eq!(
        args[2],
        format!(
            "{}/v2/projects/paper/versions/1.20.4/builds/497/downloads/paper-1.20.4-497.jar",
            h.upstream.uri()
        )
    );
    assert_eq!(&args[5..], &["--hash-type", "sha256", "--hash", SHA256]);

    let main = &pod.containers[0];
    assert!(main
        .args
        .as_ref()
        .unwrap()
        .contains(&"--log-append=false".to_string()));
    let mounts: Vec<&str> = main
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| m.mount_path.as_str())
        .collect();
    for path in [
        "/usr/local/minecraft/plugins",
        "/var/minecraft/world",
        "/var/minecraft/world_nether",
        "/var/minecraft/world_the_end",
    ] {
        assert!(mounts.contains(&path), "missing mount {path}");
    }
}

#[tokio::test]
async fn test_unexposed_server_deletes_existing_service() {
    let h = Harness::new().await;
    h.add_server("lobby", json!({"eula": "Accepted", "service": {"type": "None"}}));
    h.store().insert(Service {
        metadata: ObjectMeta {
            name: Some("lobby".to_string()),
            namespace: Some(NS.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    let (changes, _) = h.converge("lobby").await;

    assert!(changes.contains(&ReconcileOutcome::Changed {
        object: OwnedObject::Service,
        outcome: SyncOutcome::Deleted,
    }));
    assert!(h.store().peek::<Service>(NS, "lobby").is_none());
    assert!(h.store().peek::<Service>(NS, "lobby-rcon").is_some());
}

#[tokio::test]
async fn test_forge_is_unsupported() {
    let h = Harness::new().await;
    h.add_server("modded", json!({"eula": "Accepted", "type": "Forge"}));

    let mut error = None;
    for _ in 0..10 {
        match h.reconcile("modded").await {
            Ok(outcome) => assert!(outcome.is_changed(), "forge server converged"),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    let error = error.expect("forge reconcile should fail");
    assert!(matches!(
        error,
        ReconcileError::Build(BuildError::UnsupportedFlavor(_))
    ));
    assert!(h.store().peek::<ReplicaSet>(NS, "modded").is_none());

    let server: MinecraftServer = h.store().peek(NS, "modded").unwrap();
    let status = server.status.unwrap();
    assert_eq!(status.state, Some(ServerState::Error));
    assert!(status.message.unwrap().contains("not supported"));
}

#[tokio::test]
async fn test_unknown_version_aborts_before_replica_set() {
    let h = Harness::new().await;
    h.add_server("lobby", json!({"eula": "Accepted", "minecraftVersion": "0.0.1"}));

    let mut last = h.reconcile("lobby").await;
    while matches!(last, Ok(ref o) if o.is_changed()) {
        last = h.reconcile("lobby").await;
    }

    let err = last.unwrap_err();
    assert!(err.to_string().contains("\"0.0.1\" not found"));
    assert!(h.store().peek::<ReplicaSet>(NS, "lobby").is_none());
}

#[tokio::test]
async fn test_every_owned_object_carries_owner() {
    let h = Harness::new().await;
    let server = h.add_server(
        "lobby",
        json!({"eula": "Accepted", "service": {"type": "LoadBalancer"}}),
    );
    // Pre-existing and unowned.
    h.store().insert(ConfigMap {
        metadata: ObjectMeta {
            name: Some("lobby".to_string()),
            namespace: Some(NS.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    let first = h.reconcile("lobby").await.unwrap();
    assert_eq!(
        first,
        ReconcileOutcome::Changed {
            object: OwnedObject::ConfigMap,
            outcome: SyncOutcome::OwnerCorrected,
        }
    );

    h.converge("lobby").await;

    let owner = owner_reference(&server).unwrap();
    let cm: ConfigMap = h.store().peek(NS, "lobby").unwrap();
    let svc: Service = h.store().peek(NS, "lobby").unwrap();
    let rcon: Service = h.store().peek(NS, "lobby-rcon").unwrap();
    let rs: ReplicaSet = h.store().peek(NS, "lobby").unwrap();
    for meta in [&cm.metadata, &svc.metadata, &rcon.metadata, &rs.metadata] {
        assert!(has_owner(meta, &owner), "{:?} not owned", meta.name);
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_operator_added_ports_are_kept() {
    let h = Harness::new().await;
    let server = h.add_server(
        "lobby",
        json!({"eula": "Accepted", "service": {"type": "NodePort", "minecraftNodePort": 30565}}),
    );
    h.store().insert(Service {
        metadata: ObjectMeta {
            name: Some("lobby".to_string()),
            namespace: Some(NS.to_string()),
            owner_references: Some(vec![owner_reference(&server).unwrap()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: 9225,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    });

    let (changes, _) = h.converge("lobby").await;

    let service_fixes: Vec<_> = changes
        .iter()
        .filter_map(|c| match c {
            ReconcileOutcome::Changed {
                object: OwnedObject::Service,
                outcome,
            } => Some(outcome.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        service_fixes,
        vec![
            SyncOutcome::Corrected("spec.type".to_string()),
            SyncOutcome::Corrected("spec.ports[minecraft] (added)".to_string()),
        ]
    );

    let svc: Service = h.store().peek(NS, "lobby").unwrap();
    let spec = svc.spec.unwrap();
    assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    let ports = spec.ports.unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].name.as_deref(), Some("metrics"));
    assert_eq!(ports[1].name.as_deref(), Some("minecraft"));
    assert_eq!(ports[1].node_port, Some(30565));
}

#[tokio::test]
async fn test_ready_replica_marks_server_running() {
    let h = Harness::new().await;
    h.add_server("lobby", json!({"eula": "Accepted"}));
    h.converge("lobby").await;

    let mut rs: ReplicaSet = h.store().peek(NS, "lobby").unwrap();
    rs.status = Some(ReplicaSetStatus {
        replicas: 1,
        ready_replicas: Some(1),
        ..Default::default()
    });
    h.store().insert(rs);

    let outcome = h.reconcile("lobby").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged { state: ServerState::Running });

    let server: MinecraftServer = h.store().peek(NS, "lobby").unwrap();
    let status = server.status.unwrap();
    assert_eq!(status.state, Some(ServerState::Running));
    assert!(status.message.is_none());
    assert!(status.last_transition_time.is_some());
}

#[tokio::test]
async fn test_datapacks_installed_after_config_copy() {
    let h = Harness::new().await;
    h.add_server(
        "lobby",
        json!({
            "eula": "Accepted",
            "vanillaTweaks": {"datapacks": [{"name": "graves", "category": "survival"}]}
        }),
    );

    h.converge("lobby").await;

    let pod = h.pod_spec("lobby");
    let init = pod.init_containers.unwrap();
    assert_eq!(
        container_names(&init),
        vec!["download-minecraft-jar", "copy-config", "install-vanillatweaks"]
    );
    let args = init[2].args.as_ref().unwrap();
    assert!(args[2].contains("wget -O vt.zip \"$1\""));
    assert_eq!(
        args.last().unwrap(),
        &format!("{}/download/VanillaTweaks_abc.zip", h.upstream.uri())
    );
}

fn with_graves() -> serde_json::Value {
    json!({
        "eula": "Accepted",
        "vanillaTweaks": {"datapacks": [{"name": "graves", "category": "survival"}]}
    })
}

fn assert_datapack_failure(h: &Harness, name: &str, error: &ReconcileError) {
    assert!(
        matches!(
            error,
            ReconcileError::Build(BuildError::Resolve(ResolveError::Datapack(_)))
        ),
        "unexpected error: {error:?}"
    );
    assert!(h.store().peek::<ReplicaSet>(NS, name).is_none());

    let server: MinecraftServer = h.store().peek(NS, name).unwrap();
    assert_eq!(server.status.unwrap().state, Some(ServerState::Error));
}

#[tokio::test]
async fn test_datapack_error_aborts_pod_template() {
    let h = Harness::with_datapacks(
        ResponseTemplate::new(200).set_body_json(json!({"status": "error"})),
    )
    .await;
    h.add_server("lobby", with_graves());

    let error = h.first_error("lobby").await;

    assert_datapack_failure(&h, "lobby", &error);
}

#[tokio::test]
async fn test_datapack_link_with_shell_quote_is_rejected() {
    let h = Harness::with_datapacks(ResponseTemplate::new(200).set_body_json(json!({
        "status": "success",
        "link": "/d.zip'; touch /tmp/owned; echo '"
    })))
    .await;
    h.add_server("lobby", with_graves());

    let error = h.first_error("lobby").await;

    assert_datapack_failure(&h, "lobby", &error);
}

#[tokio::test]
async fn test_paper_regions_choose_volumes_independently() {
    let h = Harness::new().await;
    h.add_server(
        "survival",
        json!({
            "eula": "Accepted",
            "type": "Paper",
            "world": {"nether": {"claimName": "survival-nether"}}
        }),
    );

    h.converge("survival").await;

    let volumes = h.pod_spec("survival").volumes.unwrap();
    let region = |name: &str| {
        volumes
            .iter()
            .find(|v| v.name == name)
            .unwrap_or_else(|| panic!("missing volume {name}"))
            .clone()
    };

    let nether = region("world-nether");
    assert_eq!(
        nether.persistent_volume_claim.unwrap().claim_name,
        "survival-nether"
    );
    assert!(nether.empty_dir.is_none());
    for name in ["world-overworld", "world-the-end"] {
        let scratch = region(name);
        assert!(scratch.empty_dir.is_some(), "{name} should be scratch space");
        assert!(scratch.persistent_volume_claim.is_none());
    }
}

#[tokio::test]
async fn test_missing_server_is_not_an_error() {
    let h = Harness::new().await;
    assert_eq!(h.reconcile("ghost").await.unwrap(), ReconcileOutcome::NotFound);
    assert_eq!(h.store().writes(), 0);
}
