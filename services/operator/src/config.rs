//! Operator configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use kubestro_resolver::{
    DEFAULT_PAPER_API_URL, DEFAULT_VANILLA_TWEAKS_URL, DEFAULT_VERSION_MANIFEST_URL,
};

/// Image of the checksum-verifying downloader used by the download init step.
pub const DEFAULT_DOWNLOADER_IMAGE: &str = "ghcr.io/kubestro/kubestro-download:latest";

/// Operator configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch. `None` watches every namespace.
    pub namespace: Option<String>,

    /// Requeue delay for a converged server.
    pub resync_interval: Duration,

    /// Requeue delay after a failed reconcile.
    pub error_requeue: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Vanilla version index.
    pub version_manifest_url: String,

    /// Paper build API base URL.
    pub paper_api_url: String,

    /// Vanilla Tweaks base URL.
    pub vanilla_tweaks_url: String,

    /// Downloader init container image.
    pub downloader_image: String,

    /// Password written to `rcon.password`.
    pub rcon_password: String,
}

fn secs(var: &str, default: u64) -> Result<Duration> {
    let value: u64 = std::env::var(var)
        .ok()
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{var} must be an integer (seconds)."))?
        .unwrap_or(default);
    Ok(Duration::from_secs(value.max(1)))
}

fn string_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let namespace = std::env::var("KUBESTRO_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        let resync_interval = secs("KUBESTRO_RESYNC_INTERVAL_SECS", 300)?;
        let error_requeue = secs("KUBESTRO_ERROR_REQUEUE_SECS", 30)?;

        let rcon_password = std::env::var("KUBESTRO_RCON_PASSWORD")
            .context("Missing RCON password. Set KUBESTRO_RCON_PASSWORD.")?;

        Ok(Self {
            namespace,
            resync_interval,
            error_requeue,
            log_level: string_or("KUBESTRO_LOG_LEVEL", "info"),
            version_manifest_url: string_or(
                "KUBESTRO_VERSION_MANIFEST_URL",
                DEFAULT_VERSION_MANIFEST_URL,
            ),
            paper_api_url: string_or("KUBESTRO_PAPER_API_URL", DEFAULT_PAPER_API_URL),
            vanilla_tweaks_url: string_or(
                "KUBESTRO_VANILLA_TWEAKS_URL",
                DEFAULT_VANILLA_TWEAKS_URL,
            ),
            downloader_image: string_or("KUBESTRO_DOWNLOADER_IMAGE", DEFAULT_DOWNLOADER_IMAGE),
            rcon_password,
        })
    }
}
