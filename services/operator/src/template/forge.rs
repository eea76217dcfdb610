use async_trait::async_trait;
use kubestro_resolver::ResolveError;
use tracing::warn;

use super::{FlavorLayout, FlavorStrategy};
use crate::crd::MinecraftServerSpec;

/// Forge servers are not supported yet. The layout is always empty, which
/// the builder reports as an unsupported flavor.
pub struct ForgeStrategy;

#[async_trait]
impl FlavorStrategy for ForgeStrategy {
    async fn layout(
        &self,
        spec: &MinecraftServerSpec,
    ) -> Result<Option<FlavorLayout>, ResolveError> {
        warn!(version = %spec.minecraft_version, "Forge servers are not supported");
        Ok(None)
    }
}
