use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kubestro_reconcile::ObjectKind;

use super::owned_meta;
use crate::crd::MinecraftServer;
use crate::render::{ConfigRenderer, RenderError};

/// Server configuration files. Compared as a single `data` field.
pub struct ConfigMapKind;

impl ObjectKind for ConfigMapKind {
    type Object = ConfigMap;

    fn correct(observed: &mut ConfigMap, desired: &ConfigMap) -> Option<String> {
        if observed.data != desired.data {
            observed.data = desired.data.clone();
            return Some("data".to_string());
        }
        None
    }
}

/// ConfigMap named after the server, holding every rendered file.
pub fn desired_config_map(
    server: &MinecraftServer,
    renderer: &ConfigRenderer,
) -> Result<ConfigMap, RenderError> {
    Ok(ConfigMap {
        metadata: owned_meta(server, server.name_any()),
        data: Some(renderer.render(&server.spec)?),
        ..Default::default()
    })
}
