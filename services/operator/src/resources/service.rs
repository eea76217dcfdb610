use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::ResourceExt;
use kubestro_reconcile::{correct_ports, ObjectKind};

use super::{owned_meta, pod_labels};
use crate::crd::MinecraftServer;

/// Game port.
pub const MINECRAFT_PORT: i32 = 25565;

/// Remote console port.
pub const RCON_PORT: i32 = 25575;

/// Exposure objects: the primary game service and the RCON service.
///
/// Compared fields, in order: service type (only when the desired shape
/// names one), then the additive port merge.
pub struct ServiceKind;

impl ObjectKind for ServiceKind {
    type Object = Service;

    fn correct(observed: &mut Service, desired: &Service) -> Option<String> {
        let want = desired.spec.as_ref()?;
        let have = observed.spec.get_or_insert_with(ServiceSpec::default);

        if want.type_.is_some() && have.type_ != want.type_ {
            have.type_ = want.type_.clone();
            return Some("spec.type".to_string());
        }

        let desired_ports = want.ports.as_deref().unwrap_or_default();
        correct_ports(have.ports.get_or_insert_with(Vec::new), desired_ports)
    }
}

pub fn rcon_service_name(server_name: &str) -> String {
    format!("{server_name}-rcon")
}

fn tcp_port(name: &str, port: i32, node_port: Option<i32>) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        port,
        node_port,
        ..Default::default()
    }
}

/// Primary game service, or `None` when the server is not exposed.
pub fn desired_service(server: &MinecraftServer) -> Option<Service> {
    let exposure = server.spec.exposure()?;
    let name = server.name_any();
    let node_port = exposure.minecraft_node_port.filter(|p| *p > 0);

    Some(Service {
        metadata: owned_meta(server, name.clone()),
        spec: Some(ServiceSpec {
            type_: exposure.service_type.as_kube().map(str::to_string),
            selector: Some(pod_labels(&name)),
            ip_family_policy: Some("PreferDualStack".to_string()),
            ports: Some(vec![tcp_port("minecraft", MINECRAFT_PORT, node_port)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// RCON service. Always present, with the store's default type.
pub fn desired_rcon_service(server: &MinecraftServer) -> Service {
    let name = server.name_any();

    Service {
        metadata: owned_meta(server, rcon_service_name(&name)),
        spec: Some(ServiceSpec {
            selector: Some(pod_labels(&name)),
            ip_family_policy: Some("PreferDualStack".to_string()),
            ports: Some(vec![tcp_port("rcon", RCON_PORT, None)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
