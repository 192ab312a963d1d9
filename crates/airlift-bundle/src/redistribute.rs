//! Re-materialize bundled artifacts in a target registry
//!
//! Images go through up to three tiers, each tried only after the previous
//! one failed:
//!
//! 1. native push over the OCI distribution API
//! 2. the container engine CLI (`load`, `tag`, `push`)
//! 3. manual instructions, reported as a failure
//!
//! No artifact is ever dropped silently: every archive yields an outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use airlift_core::naming::image_ref_from_archive_name;
use airlift_core::{ArtifactStatus, ProgressReporter};
use airlift_repo::{DockerConfig, ImagePusher, RegistryCredentials, RegistryPusher};

use crate::engine::{CommandRunner, ContainerEngine, ProcessRunner, strip_registry};
use crate::error::Result;
use crate::publish::{ChartPublishOutcome, ChartPublisher};

/// Tunables for a [`Redistributor`]
#[derive(Debug, Clone)]
pub struct RedistributorConfig {
    /// Container engine CLI for the fallback tier
    pub engine_program: String,
    /// Use plain HTTP and accept any certificate for loopback and
    /// cluster-local registries
    pub insecure_local: bool,
}

impl Default for RedistributorConfig {
    fn default() -> Self {
        Self {
            engine_program: "docker".to_string(),
            insecure_local: true,
        }
    }
}

/// The tier that delivered an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTier {
    Native,
    Engine,
}

impl std::fmt::Display for PushTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushTier::Native => write!(f, "registry API"),
            PushTier::Engine => write!(f, "container engine"),
        }
    }
}

/// Result of pushing one image archive
#[derive(Debug, Clone)]
pub struct ImagePushOutcome {
    pub archive: PathBuf,
    pub target: String,
    /// `None` when every tier failed
    pub delivered_by: Option<PushTier>,
    /// Failure message of each tier tried, in order
    pub attempts: Vec<String>,
    /// Commands to run by hand after a failure
    pub remediation: Option<String>,
}

impl ImagePushOutcome {
    pub fn is_ok(&self) -> bool {
        self.delivered_by.is_some()
    }

    /// Outcome for an image that could not be attempted at all
    pub fn unreachable(archive: &Path, reason: &str) -> Self {
        Self {
            archive: archive.to_path_buf(),
            target: archive_image_ref(archive),
            delivered_by: None,
            attempts: vec![format!("target unreachable: {}", reason)],
            remediation: None,
        }
    }
}

/// Reference an image archive is pushed as: `<registry>/<decoded file name>`
pub fn target_reference(archive: &Path, registry: &str) -> String {
    format!(
        "{}/{}",
        registry.trim_end_matches('/'),
        archive_image_ref(archive)
    )
}

/// Image reference encoded in an archive's file name
fn archive_image_ref(archive: &Path) -> String {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    image_ref_from_archive_name(&file_name)
}

/// Instructions for pushing an image by hand
pub fn manual_push_steps(engine: &str, archive: &Path, target: &str) -> String {
    format!(
        "Manual steps to push this image:\n  \
         1. Load the image: {engine} load -i {archive}\n  \
         2. Tag the image: {engine} tag {repo} {target}\n  \
         3. Push the image: {engine} push {target}",
        archive = archive.display(),
        repo = strip_registry(target),
    )
}

pub struct Redistributor {
    pusher: Arc<dyn ImagePusher>,
    engine: ContainerEngine,
    publisher: ChartPublisher,
}

impl Redistributor {
    /// Real registry, engine and chart repository clients
    pub fn new(config: RedistributorConfig, docker_config: DockerConfig) -> Result<Self> {
        Ok(Self::with_parts(
            Arc::new(RegistryPusher::new(docker_config, config.insecure_local)),
            Arc::new(ProcessRunner),
            ChartPublisher::new()?,
            &config,
        ))
    }

    pub fn with_parts(
        pusher: Arc<dyn ImagePusher>,
        runner: Arc<dyn CommandRunner>,
        publisher: ChartPublisher,
        config: &RedistributorConfig,
    ) -> Self {
        Self {
            pusher,
            engine: ContainerEngine::new(runner, config.engine_program.clone()),
            publisher,
        }
    }

    pub fn engine(&self) -> &ContainerEngine {
        &self.engine
    }

    /// Log the container engine into `registry`
    ///
    /// Returns `false` when no engine is installed; the native tier then uses
    /// the credentials directly.
    pub async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<bool> {
        if !self.engine.is_available() {
            tracing::info!(
                engine = self.engine.program(),
                "container engine not available, credentials will be used directly"
            );
            return Ok(false);
        }
        self.engine.login(registry, credentials).await?;
        tracing::info!(registry, "container engine authenticated");
        Ok(true)
    }

    /// Push one image archive as `target`, falling through the tiers
    pub async fn push_image(
        &self,
        archive: &Path,
        target: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> ImagePushOutcome {
        let mut outcome = ImagePushOutcome {
            archive: archive.to_path_buf(),
            target: target.to_string(),
            delivered_by: None,
            attempts: Vec::new(),
            remediation: None,
        };

        match self.pusher.push(archive, target, credentials).await {
            Ok(manifest_url) => {
                tracing::debug!(image = %target, manifest_url = %manifest_url, "pushed via registry API");
                outcome.delivered_by = Some(PushTier::Native);
                return outcome;
            }
            Err(e) => {
                tracing::warn!(image = %target, error = %e, "registry push failed");
                outcome.attempts.push(format!("registry API: {}", e));
            }
        }

        if self.engine.is_available() {
            tracing::info!(image = %target, engine = self.engine.program(), "retrying with container engine");
            match self.engine.push_archive(archive, target).await {
                Ok(()) => {
                    outcome.delivered_by = Some(PushTier::Engine);
                    return outcome;
                }
                Err(e) => {
                    tracing::warn!(image = %target, error = %e, "container engine push failed");
                    outcome.attempts.push(format!("container engine: {}", e));
                }
            }
        } else {
            outcome
                .attempts
                .push(format!("container engine: {} not available", self.engine.program()));
        }

        outcome.remediation = Some(manual_push_steps(self.engine.program(), archive, target));
        outcome
    }

    /// Push every archive to `registry`, one at a time, continuing past failures
    pub async fn push_images(
        &self,
        archives: &[PathBuf],
        registry: &str,
        credentials: Option<&RegistryCredentials>,
        progress: &dyn ProgressReporter,
    ) -> Vec<ImagePushOutcome> {
        progress.phase("Pushing images", archives.len());

        let mut outcomes = Vec::with_capacity(archives.len());
        for archive in archives {
            let target = target_reference(archive, registry);
            progress.update(&target, ArtifactStatus::InProgress, None);

            let outcome = self.push_image(archive, &target, credentials).await;
            match outcome.delivered_by {
                Some(tier) => progress.update(&target, ArtifactStatus::Done, Some(&tier.to_string())),
                None => progress.update(&target, ArtifactStatus::Failed, outcome.attempts.last().map(String::as_str)),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn publish_chart(&self, chart: &Path, endpoint: &str) -> ChartPublishOutcome {
        self.publisher.publish(chart, endpoint).await
    }

    /// Publish every chart to `endpoint`, one at a time, continuing past failures
    pub async fn publish_charts(
        &self,
        charts: &[PathBuf],
        endpoint: &str,
        progress: &dyn ProgressReporter,
    ) -> Vec<ChartPublishOutcome> {
        progress.phase("Publishing charts", charts.len());

        let mut outcomes = Vec::with_capacity(charts.len());
        for chart in charts {
            let label = chart
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| chart.display().to_string());
            progress.update(&label, ArtifactStatus::InProgress, None);

            let outcome = self.publish_chart(chart, endpoint).await;
            if outcome.is_ok() {
                progress.update(&label, ArtifactStatus::Done, None);
            } else {
                progress.update(&label, ArtifactStatus::Failed, outcome.attempts.last().map(String::as_str));
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}
