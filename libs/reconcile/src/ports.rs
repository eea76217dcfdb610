//! Additive port reconciliation for exposure objects.

use k8s_openapi::api::core::v1::ServicePort;

/// Correct the first port discrepancy between `observed` and `desired`.
///
/// Ports are matched by name and checked in desired order: protocol, port
/// number, then node port (only when the desired port pins one). A desired
/// port missing from `observed` is appended. Observed ports with no desired
/// counterpart are never removed.
///
/// Returns a description of the corrected field, or `None` if every desired
/// port already matches.
pub fn correct_ports(observed: &mut Vec<ServicePort>, desired: &[ServicePort]) -> Option<String> {
    for want in desired {
        let label = want.name.as_deref().unwrap_or_default();
        let Some(have) = observed.iter_mut().find(|p| p.name == want.name) else {
            observed.push(want.clone());
            return Some(format!("spec.ports[{label}] (added)"));
        };

        if want.protocol.is_some() && have.protocol != want.protocol {
            have.protocol = want.protocol.clone();
            return Some(format!("spec.ports[{label}].protocol"));
        }

        if have.port != want.port {
            have.port = want.port;
            return Some(format!("spec.ports[{label}].port"));
        }

        if want.node_port.is_some_and(|p| p != 0) && have.node_port != want.node_port {
            have.node_port = want.node_port;
            return Some(format!("spec.ports[{label}].nodePort"));
        }
    }

    None
}
