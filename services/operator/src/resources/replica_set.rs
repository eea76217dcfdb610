use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kubestro_reconcile::ObjectKind;

use super::{owned_meta, pod_labels};
use crate::crd::MinecraftServer;

/// A server runs as a single pod.
pub const REPLICAS: i32 = 1;

/// The server's ReplicaSet. Only the replica count is compared; a replica
/// set does not roll existing pods, so template drift is left alone.
pub struct ReplicaSetKind;

impl ObjectKind for ReplicaSetKind {
    type Object = ReplicaSet;

    fn correct(observed: &mut ReplicaSet, desired: &ReplicaSet) -> Option<String> {
        let want = desired.spec.as_ref()?;
        let Some(have) = observed.spec.as_mut() else {
            observed.spec = Some(want.clone());
            return Some("spec".to_string());
        };

        if have.replicas != want.replicas {
            have.replicas = want.replicas;
            return Some("spec.replicas".to_string());
        }
        None
    }
}

/// ReplicaSet running `template`, named after the server.
pub fn desired_replica_set(server: &MinecraftServer, template: PodTemplateSpec) -> ReplicaSet {
    let name = server.name_any();

    ReplicaSet {
        metadata: owned_meta(server, name.clone()),
        spec: Some(ReplicaSetSpec {
            replicas: Some(REPLICAS),
            selector: LabelSelector {
                match_labels: Some(pod_labels(&name)),
                ..Default::default()
            },
            template: Some(template),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::server;

    #[test]
    fn test_replica_count_corrected() {
        let mcs = server("lobby", serde_json::json!({"eula": "Accepted"}));
        let desired = desired_replica_set(&mcs, PodTemplateSpec::default());

        let mut observed = desired.clone();
        if let Some(spec) = observed.spec.as_mut() {
            spec.replicas = Some(3);
            spec.template = None;
        }

        assert_eq!(
            ReplicaSetKind::correct(&mut observed, &desired).as_deref(),
            Some("spec.replicas")
        );
        assert_eq!(observed.spec.as_ref().and_then(|s| s.replicas), Some(REPLICAS));
        // Template drift is not a discrepancy.
        assert_eq!(ReplicaSetKind::correct(&mut observed, &desired), None);
    }

    #[test]
    fn test_selector_matches_pod_labels() {
        let mcs = server("lobby", serde_json::json!({"eula": "Accepted"}));
        let rs = desired_replica_set(&mcs, PodTemplateSpec::default());
        let spec = rs.spec.unwrap();

        assert_eq!(spec.selector.match_labels, Some(pod_labels("lobby")));
        assert_eq!(spec.replicas, Some(1));
    }
}
