use std::sync::Arc;

use async_trait::async_trait;
use kubestro_resolver::{ResolveError, VersionResolver};

use super::{java_args, mount, region_volume, FlavorLayout, FlavorStrategy, WORLD_ROOT};
use crate::crd::MinecraftServerSpec;

const JAR_NAME: &str = "minecraft.jar";
const WORLD_VOLUME: &str = "world";

/// Mojang's server jar. The whole world lives in one region volume.
pub struct VanillaStrategy {
    resolver: Arc<dyn VersionResolver>,
}

impl VanillaStrategy {
    pub fn new(resolver: Arc<dyn VersionResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl FlavorStrategy for VanillaStrategy {
    async fn layout(
        &self,
        spec: &MinecraftServerSpec,
    ) -> Result<Option<FlavorLayout>, ResolveError> {
        let artifact = self.resolver.resolve(&spec.minecraft_version).await?;
        let overworld = spec.world.as_ref().and_then(|w| w.overworld.as_ref());

        Ok(Some(FlavorLayout {
            artifact,
            jar_name: JAR_NAME,
            args: java_args(
                JAR_NAME,
                &[&format!("--universe={WORLD_ROOT}"), "--nogui"],
            ),
            volumes: vec![region_volume(WORLD_VOLUME, overworld)],
            mounts: vec![mount(WORLD_VOLUME, &format!("{WORLD_ROOT}/world"))],
        }))
    }
}
