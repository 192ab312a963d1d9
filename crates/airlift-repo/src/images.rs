//! Image transfer: bounded-concurrency fetching and registry pushes

use airlift_core::naming::image_archive_name;
use airlift_core::{ArtifactStatus, ProgressReporter};
use async_trait::async_trait;
use futures::future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::credentials::{DockerConfig, RegistryCredentials, resolve_auth};
use crate::error::{RepoError, Result};
use crate::oci::{OciClient, PulledImage, parse_reference};

/// Default number of concurrent image pulls
pub const DEFAULT_PARALLELISM: usize = 4;

/// Something that can write an image reference to a local archive
#[async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull(&self, reference: &str, dest: &Path) -> Result<PulledImage>;
}

/// Pulls from remote registries with credentials from the Docker config
pub struct RegistryPuller {
    client: OciClient,
    docker_config: DockerConfig,
    credentials: Option<RegistryCredentials>,
}

impl RegistryPuller {
    pub fn new(docker_config: DockerConfig, credentials: Option<RegistryCredentials>) -> Self {
        Self {
            client: OciClient::new(),
            docker_config,
            credentials,
        }
    }
}

#[async_trait]
impl ImagePuller for RegistryPuller {
    async fn pull(&self, reference: &str, dest: &Path) -> Result<PulledImage> {
        let registry = parse_reference(reference)?.registry().to_string();
        let auth = resolve_auth(&registry, self.credentials.as_ref(), &self.docker_config);
        self.client.pull_to_archive(reference, &auth, dest).await
    }
}

/// Something that can write a local image archive to a registry
#[async_trait]
pub trait ImagePusher: Send + Sync {
    /// Push `archive` as `target`, returning the manifest URL
    async fn push(
        &self,
        archive: &Path,
        target: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String>;
}

/// Pushes over the OCI distribution API
pub struct RegistryPusher {
    docker_config: DockerConfig,
    insecure_local: bool,
}

impl RegistryPusher {
    pub fn new(docker_config: DockerConfig, insecure_local: bool) -> Self {
        Self {
            docker_config,
            insecure_local,
        }
    }
}

#[async_trait]
impl ImagePusher for RegistryPusher {
    async fn push(
        &self,
        archive: &Path,
        target: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let registry = parse_reference(target)?.registry().to_string();
        let auth = resolve_auth(&registry, credentials, &self.docker_config);
        OciClient::for_target(&registry, self.insecure_local)
            .push_archive(archive, target, &auth)
            .await
    }
}

/// Result of fetching one image
#[derive(Debug)]
pub struct ImageOutcome {
    pub reference: String,
    pub result: Result<PulledImage>,
}

impl ImageOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fetch every reference into `out_dir/<encoded-ref>.tar`
///
/// At most `parallelism` pulls run at once (`0` counts as `1`). A failure does
/// not stop its siblings. Returns one outcome per reference, in input order,
/// once every pull has finished.
pub async fn fetch_images(
    puller: Arc<dyn ImagePuller>,
    references: &[String],
    out_dir: &Path,
    parallelism: usize,
    progress: Arc<dyn ProgressReporter>,
) -> Vec<ImageOutcome> {
    let parallelism = parallelism.max(1);
    progress.phase("Fetching images", references.len());
    tracing::info!(count = references.len(), parallelism, "fetching images");

    let semaphore = Arc::new(Semaphore::new(parallelism));
    let mut handles = Vec::with_capacity(references.len());

    for reference in references {
        let reference = reference.clone();
        let dest: PathBuf = out_dir.join(image_archive_name(&reference));
        let puller = puller.clone();
        let semaphore = semaphore.clone();
        let progress = progress.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|e| RepoError::Pull {
                reference: reference.clone(),
                message: e.to_string(),
            })?;

            progress.update(&reference, ArtifactStatus::InProgress, None);
            let result = puller.pull(&reference, &dest).await;
            match &result {
                Ok(image) => {
                    tracing::debug!(reference = %reference, size = image.size, "image fetched");
                    progress.update(&reference, ArtifactStatus::Done, None);
                }
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "image fetch failed");
                    progress.update(&reference, ArtifactStatus::Failed, Some(&e.to_string()));
                }
            }
            result
        }));
    }

    let results = future::join_all(handles).await;

    references
        .iter()
        .zip(results)
        .map(|(reference, joined)| ImageOutcome {
            reference: reference.clone(),
            result: joined.unwrap_or_else(|e| {
                Err(RepoError::Pull {
                    reference: reference.clone(),
                    message: format!("task failed: {}", e),
                })
            }),
        })
        .collect()
}
