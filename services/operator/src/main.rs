//! Kubestro operator
//!
//! Watches `MinecraftServer` resources and converges the ConfigMap, Services
//! and ReplicaSet of each server.
//!
//! ## Architecture
//!
//! - **Controller**: watch-driven requeue loop over servers and owned objects
//! - **Reconciler**: one corrective write per pass, in a fixed object order
//! - **Resolvers**: version manifest, Paper builds and Vanilla Tweaks, over HTTP
//! - **Store**: the cluster API behind the `ObjectStore` seam

use std::sync::Arc;

use anyhow::{Context, Result};
use kubestro_operator::config::Config;
use kubestro_operator::controller;
use kubestro_operator::kube_store::KubeStore;
use kubestro_operator::render::ConfigRenderer;
use kubestro_operator::template::PodTemplateBuilder;
use kubestro_operator::Reconciler;
use kubestro_resolver::{BuildResolver, DatapackResolver, ManifestResolver};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        version_manifest_url = %config.version_manifest_url,
        paper_api_url = %config.paper_api_url,
        vanilla_tweaks_url = %config.vanilla_tweaks_url,
        downloader_image = %config.downloader_image,
        "Starting kubestro operator"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("kubestro-operator/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let manifest = ManifestResolver::new(http.clone(), config.version_manifest_url.clone());
    let paper = BuildResolver::new(http.clone(), config.paper_api_url.clone(), manifest.clone());
    let datapacks = DatapackResolver::new(http, config.vanilla_tweaks_url.clone());
    let builder = PodTemplateBuilder::new(
        Arc::new(manifest),
        Arc::new(paper),
        datapacks,
        config.downloader_image.clone(),
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let reconciler = Reconciler::new(
        KubeStore::new(client.clone()),
        ConfigRenderer::new(config.rcon_password.clone()),
        builder,
    );

    controller::run(client, &config, reconciler).await;

    info!("Operator shutdown complete");
    Ok(())
}
