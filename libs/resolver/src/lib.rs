//! Version, build and datapack resolvers.
//!
//! Turns the symbolic version of a server spec into concrete download
//! coordinates:
//!
//! - [`ManifestResolver`]: the vanilla version manifest (sentinels, per-version
//!   Java requirement, sha1 of the server jar)
//! - [`BuildResolver`]: the Paper build API (latest build, sha256 of the jar)
//! - [`DatapackResolver`]: the Vanilla Tweaks datapack bundler
//!
//! Every call is a plain HTTP request: no retries, no caching. Callers pay
//! the network cost on each reconcile.

mod datapacks;
mod manifest;
mod paper;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub use datapacks::{group_by_category, DatapackResolver, DEFAULT_VANILLA_TWEAKS_URL};
pub use manifest::{ManifestResolver, VersionManifest, DEFAULT_VERSION_MANIFEST_URL};
pub use paper::{BuildResolver, DEFAULT_PAPER_API_URL};

/// Errors from resolver calls.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Minecraft version \"{0}\" not found")]
    VersionNotFound(String),

    #[error("no builds published for version {0}")]
    NoBuilds(String),

    #[error("invalid {algorithm} digest {digest:?}")]
    InvalidDigest { algorithm: HashType, digest: String },

    #[error("datapack service: {0}")]
    Datapack(String),
}

/// Digest algorithm understood by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha1,
    Sha256,
}

impl HashType {
    /// Value of the downloader's `--hash-type` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of a hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hex digest tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: HashType,
    hex: String,
}

impl Digest {
    /// Validate and wrap a hex digest. Upper-case input is normalized.
    pub fn new(algorithm: HashType, hex: &str) -> Result<Self, ResolveError> {
        let valid = hex.len() == algorithm.hex_len() && hex.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(ResolveError::InvalidDigest {
                algorithm,
                digest: hex.to_string(),
            });
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> HashType {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// Concrete download coordinates for a server jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// Concrete version id (sentinels already resolved).
    pub version: String,

    /// Download URL of the server jar.
    pub url: String,

    /// Expected digest of the downloaded file.
    pub digest: Digest,

    /// Minimum Java major version required to run the jar.
    pub java_major: u32,
}

/// Resolves a (possibly symbolic) version to a downloadable server jar.
#[async_trait]
pub trait VersionResolver: Send + Sync {
    async fn resolve(&self, version: &str) -> Result<ResolvedArtifact, ResolveError>;
}

/// Reduce a release version to its minor version (`1.20.4` becomes `1.20`).
///
/// Versions with fewer than three dotted components are returned unchanged.
pub fn minor_version(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((idx, _)) => &version[..idx],
        None => version,
    }
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, ResolveError> {
    debug!(url = %url, "Fetching JSON");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ResolveError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| ResolveError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1.20.4", "1.20")]
    #[case("1.21", "1.21")]
    #[case("1.8.9", "1.8")]
    #[case("24w14a", "24w14a")]
    fn test_minor_version(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(minor_version(input), expected);
    }

    #[test]
    fn test_digest_validation() {
        let sha1 = "8DD1A28015F51B1803213892B50B7B4FC76E594D";
        let digest = Digest::new(HashType::Sha1, sha1).unwrap();
        assert_eq!(digest.hex(), sha1.to_ascii_lowercase());

        assert!(Digest::new(HashType::Sha256, sha1).is_err());
        assert!(Digest::new(HashType::Sha1, &"z".repeat(40)).is_err());
    }
}
