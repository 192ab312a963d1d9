//! OCI registry client for image pull and push
//!
//! Pulled images are stored as docker archives (see [`crate::docker_archive`]);
//! pushes read the same format back.

use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use std::path::{Path, PathBuf};

use crate::credentials::is_local_registry;
use crate::docker_archive::{read_docker_archive, write_docker_archive};
use crate::error::{RepoError, Result};

/// An image written to disk
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Reference as declared in the manifest
    pub reference: String,
    pub path: PathBuf,
    /// Manifest digest reported by the registry
    pub digest: String,
    /// Archive size in bytes
    pub size: u64,
}

/// Parse an image reference, applying Docker Hub defaults
///
/// `nginx` becomes `docker.io/library/nginx:latest`.
pub fn parse_reference(reference: &str) -> Result<Reference> {
    let clean = reference
        .trim_start_matches("oci://")
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    Reference::try_from(clean).map_err(|e| RepoError::InvalidImageReference {
        reference: format!("{}: {}", reference, e),
    })
}

/// OCI registry client
pub struct OciClient {
    client: Client,
}

impl OciClient {
    /// Client for public registries over HTTPS
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Client for pushing to `registry`
    ///
    /// Local registries are spoken to over plain HTTP, and invalid
    /// certificates are accepted, when `insecure_local` is set.
    pub fn for_target(registry: &str, insecure_local: bool) -> Self {
        let local = insecure_local && is_local_registry(registry);
        let protocol = if local {
            ClientProtocol::HttpsExcept(vec![registry.to_string()])
        } else {
            ClientProtocol::Https
        };
        let config = ClientConfig {
            protocol,
            accept_invalid_certificates: local,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Pull `reference` and write it as a docker archive at `dest`
    pub async fn pull_to_archive(
        &self,
        reference: &str,
        auth: &RegistryAuth,
        dest: &Path,
    ) -> Result<PulledImage> {
        let oci_ref = parse_reference(reference)?;
        let pull_err = |message: String| RepoError::Pull {
            reference: reference.to_string(),
            message,
        };

        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, auth)
            .await
            .map_err(|e| pull_err(format!("failed to pull manifest: {}", e)))?;

        let mut config: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config)
            .await
            .map_err(|e| pull_err(format!("failed to pull config blob: {}", e)))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            tracing::debug!(reference, digest = %layer.digest, size = layer.size, "pulling layer");

            let mut data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&oci_ref, layer, &mut data)
                .await
                .map_err(|e| pull_err(format!("failed to pull layer {}: {}", layer.digest, e)))?;
            layers.push(data);
        }

        // digest references cannot be tagged on load
        let repo_tags = match oci_ref.digest() {
            Some(_) => Vec::new(),
            None => vec![oci_ref.whole()],
        };
        let size = write_docker_archive(dest, &repo_tags, &manifest, &config, &layers)?;

        Ok(PulledImage {
            reference: reference.to_string(),
            path: dest.to_path_buf(),
            digest,
            size,
        })
    }

    /// Push a docker archive to `target`, returning the manifest URL
    pub async fn push_archive(
        &self,
        archive: &Path,
        target: &str,
        auth: &RegistryAuth,
    ) -> Result<String> {
        let oci_ref = parse_reference(target)?;
        let content = read_docker_archive(archive)?;

        let config = Config::new(content.config.data, content.config.media_type, None);
        let layers: Vec<ImageLayer> = content
            .layers
            .into_iter()
            .map(|l| ImageLayer::new(l.data, l.media_type, None))
            .collect();

        let response = self
            .client
            .push(&oci_ref, &layers, config, auth, content.manifest)
            .await
            .map_err(|e| RepoError::Push {
                reference: target.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(target, manifest_url = %response.manifest_url, "image pushed");
        Ok(response.manifest_url)
    }
}

impl Default for OciClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the linux image for the host architecture from a multi-arch index
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
