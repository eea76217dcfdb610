//! Vanilla version manifest resolver.
//!
//! Two requests per resolution: the top-level version index, then the
//! manifest of the matched version.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{get_json, Digest, HashType, ResolveError, ResolvedArtifact, VersionResolver};

/// Default location of the version index.
pub const DEFAULT_VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Sentinel for the current release.
const LATEST: &str = "latest";

/// Sentinel for the current snapshot.
const SNAPSHOT: &str = "snapshot";

#[derive(Debug, Deserialize)]
struct VersionIndex {
    latest: LatestVersions,
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    release: String,
    snapshot: String,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    id: String,
    url: String,
}

/// Per-version manifest, reduced to the fields the operator consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    /// Concrete version id. Filled in from the index entry.
    #[serde(skip)]
    pub id: String,
    pub java_version: JavaVersion,
    pub downloads: Downloads,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    pub major_version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Downloads {
    pub server: DownloadItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadItem {
    pub sha1: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

/// Resolves versions against the vanilla version manifest.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: reqwest::Client,
    index_url: String,
}

impl ManifestResolver {
    /// Create a resolver reading the index at `index_url`.
    pub fn new(client: reqwest::Client, index_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into(),
        }
    }

    /// Fetch the manifest of `version`, resolving `latest` and `snapshot` first.
    pub async fn version_manifest(&self, version: &str) -> Result<VersionManifest, ResolveError> {
        let index: VersionIndex = get_json(&self.client, &self.index_url).await?;

        let id = match version {
            LATEST => index.latest.release.as_str(),
            SNAPSHOT => index.latest.snapshot.as_str(),
            other => other,
        };
        if id != version {
            debug!(requested = %version, resolved = %id, "Resolved version sentinel");
        }

        let entry = index
            .versions
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| ResolveError::VersionNotFound(id.to_string()))?;

        let mut manifest: VersionManifest = get_json(&self.client, &entry.url).await?;
        manifest.id = entry.id.clone();
        Ok(manifest)
    }
}

#[async_trait]
impl VersionResolver for ManifestResolver {
    async fn resolve(&self, version: &str) -> Result<ResolvedArtifact, ResolveError> {
        let manifest = self.version_manifest(version).await?;
        let server = &manifest.downloads.server;
        let digest = Digest::new(HashType::Sha1, &server.sha1)?;

        info!(
            version = %manifest.id,
            java = manifest.java_version.major_version,
            size = server.size,
            "Resolved vanilla server jar"
        );

        Ok(ResolvedArtifact {
            version: manifest.id.clone(),
            url: server.url.clone(),
            digest,
            java_major: manifest.java_version.major_version,
        })
    }
}
