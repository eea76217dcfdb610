//! Paper build resolver.
//!
//! Paper publishes numbered builds per Minecraft version. Resolution picks
//! the highest build, then reads that build's download name and sha256.
//! The Java requirement still comes from the vanilla manifest.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::manifest::ManifestResolver;
use crate::{get_json, Digest, HashType, ResolveError, ResolvedArtifact, VersionResolver};

/// Default base URL of the Paper API.
pub const DEFAULT_PAPER_API_URL: &str = "https://api.papermc.io/v2";

const PROJECT: &str = "paper";

#[derive(Debug, Deserialize)]
struct VersionBuilds {
    builds: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct Build {
    downloads: BuildDownloads,
}

#[derive(Debug, Deserialize)]
struct BuildDownloads {
    application: BuildDownload,
}

#[derive(Debug, Deserialize)]
struct BuildDownload {
    name: String,
    sha256: String,
}

/// Resolves versions to Paper builds.
#[derive(Debug, Clone)]
pub struct BuildResolver {
    client: reqwest::Client,
    api_url: String,
    manifest: ManifestResolver,
}

impl BuildResolver {
    /// Create a resolver against the Paper API at `api_url`.
    ///
    /// `manifest` resolves version sentinels and the Java requirement.
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        manifest: ManifestResolver,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            manifest,
        }
    }

    fn version_url(&self, version: &str) -> String {
        format!("{}/projects/{PROJECT}/versions/{version}", self.api_url)
    }

    /// Latest build number published for a concrete version.
    pub async fn latest_build(&self, version: &str) -> Result<u32, ResolveError> {
        let builds: VersionBuilds = get_json(&self.client, &self.version_url(version)).await?;
        builds
            .builds
            .into_iter()
            .max()
            .ok_or_else(|| ResolveError::NoBuilds(version.to_string()))
    }

    /// Download URL and sha256 digest of one build.
    pub async fn build_download(
        &self,
        version: &str,
        build: u32,
    ) -> Result<(String, Digest), ResolveError> {
        let build_url = format!("{}/builds/{build}", self.version_url(version));
        let meta: Build = get_json(&self.client, &build_url).await?;
        let app = meta.downloads.application;

        let digest = Digest::new(HashType::Sha256, &app.sha256)?;
        let url = format!("{build_url}/downloads/{}", app.name);
        Ok((url, digest))
    }
}

#[async_trait]
impl VersionResolver for BuildResolver {
    async fn resolve(&self, version: &str) -> Result<ResolvedArtifact, ResolveError> {
        let manifest = self.manifest.version_manifest(version).await?;
        let build = self.latest_build(&manifest.id).await?;
        let (url, digest) = self.build_download(&manifest.id, build).await?;

        info!(
            version = %manifest.id,
            build,
            java = manifest.java_version.major_version,
            "Resolved Paper server jar"
        );

        Ok(ResolvedArtifact {
            version: manifest.id,
            url,
            digest,
            java_major: manifest.java_version.major_version,
        })
    }
}
