use std::sync::Arc;

use async_trait::async_trait;
use kubestro_resolver::{ResolveError, VersionResolver};

use super::{
    empty_dir, java_args, mount, region_volume, FlavorLayout, FlavorStrategy, JAR_DIR, WORLD_ROOT,
};
use crate::crd::MinecraftServerSpec;

const JAR_NAME: &str = "paper.jar";
const PLUGINS_VOLUME: &str = "plugins";

/// Paper: plugin directory, and one volume per world region.
pub struct PaperStrategy {
    resolver: Arc<dyn VersionResolver>,
}

impl PaperStrategy {
    pub fn new(resolver: Arc<dyn VersionResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl FlavorStrategy for PaperStrategy {
    async fn layout(
        &self,
        spec: &MinecraftServerSpec,
    ) -> Result<Option<FlavorLayout>, ResolveError> {
        let artifact = self.resolver.resolve(&spec.minecraft_version).await?;
        let world = spec.world.clone().unwrap_or_default();
        let plugins_dir = format!("{JAR_DIR}/plugins");

        let regions = [
            ("world-overworld", "world", world.overworld.as_ref()),
            ("world-nether", "world_nether", world.nether.as_ref()),
            ("world-the-end", "world_the_end", world.the_end.as_ref()),
        ];

        let mut volumes = vec![empty_dir(PLUGINS_VOLUME)];
        let mut mounts = vec![mount(PLUGINS_VOLUME, &plugins_dir)];
        for (volume, dir, claim) in regions {
            volumes.push(region_volume(volume, claim));
            mounts.push(mount(volume, &format!("{WORLD_ROOT}/{dir}")));
        }

        Ok(Some(FlavorLayout {
            artifact,
            jar_name: JAR_NAME,
            args: java_args(
                JAR_NAME,
                &[
                    &format!("--world-container={WORLD_ROOT}"),
                    &format!("--plugins={plugins_dir}"),
                    // Logs already go to stdout.
                    "--log-append=false",
                    "--nogui",
                ],
            ),
            volumes,
            mounts,
        }))
    }
}
