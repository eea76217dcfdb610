//! Print the MinecraftServer CustomResourceDefinition as YAML.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use kubestro_operator::MinecraftServer;

fn main() -> Result<()> {
    let crd = serde_yaml::to_string(&MinecraftServer::crd())
        .context("failed to encode CustomResourceDefinition")?;
    print!("{crd}");
    Ok(())
}
