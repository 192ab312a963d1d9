//! Push a bundle's images and charts into the target environment
//!
//! Images and charts travel concurrently. An unreachable endpoint fails the
//! artifacts that needed it instead of the whole run.

use std::path::PathBuf;

use airlift_core::ProgressReporter;
use airlift_repo::RegistryCredentials;

use crate::endpoint::EndpointProvider;
use crate::error::Result;
use crate::publish::ChartPublishOutcome;
use crate::redistribute::{ImagePushOutcome, Redistributor};
use crate::source::ArtifactSource;

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub source: ArtifactSource,
    /// Used by the registry API tier and to log in the container engine
    pub credentials: Option<RegistryCredentials>,
    pub publish_charts: bool,
}

#[derive(Debug, Default)]
pub struct PushReport {
    pub images: Vec<ImagePushOutcome>,
    pub charts: Vec<ChartPublishOutcome>,
}

impl PushReport {
    pub fn failed_images(&self) -> usize {
        self.images.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn failed_charts(&self) -> usize {
        self.charts.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_images() == 0 && self.failed_charts() == 0
    }
}

pub async fn push(
    options: &PushOptions,
    endpoints: &dyn EndpointProvider,
    redistributor: &Redistributor,
    progress: &dyn ProgressReporter,
) -> Result<PushReport> {
    let opened = options.source.open()?;
    let images = opened.image_archives()?;
    let charts = if options.publish_charts {
        opened.chart_archives()?
    } else {
        Vec::new()
    };

    if images.is_empty() && charts.is_empty() {
        tracing::warn!(source = %opened.root().display(), "no image or chart archives found");
    }
    tracing::info!(images = images.len(), charts = charts.len(), "pushing artifacts");

    let credentials = options.credentials.as_ref();
    let (images, charts) = tokio::join!(
        push_images(&images, credentials, endpoints, redistributor, progress),
        publish_charts(&charts, endpoints, redistributor, progress),
    );

    Ok(PushReport { images, charts })
}

async fn push_images(
    archives: &[PathBuf],
    credentials: Option<&RegistryCredentials>,
    endpoints: &dyn EndpointProvider,
    redistributor: &Redistributor,
    progress: &dyn ProgressReporter,
) -> Vec<ImagePushOutcome> {
    if archives.is_empty() {
        return Vec::new();
    }

    let endpoint = match endpoints.registry_endpoint().await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!(error = %e, "registry unreachable");
            let reason = e.to_string();
            return archives
                .iter()
                .map(|a| ImagePushOutcome::unreachable(a, &reason))
                .collect();
        }
    };

    if let Some(creds) = credentials {
        if let Err(e) = redistributor.login(&endpoint.address, creds).await {
            tracing::warn!(registry = %endpoint.address, error = %e, "container engine login failed");
        }
    }

    redistributor
        .push_images(archives, &endpoint.address, credentials, progress)
        .await
}

async fn publish_charts(
    charts: &[PathBuf],
    endpoints: &dyn EndpointProvider,
    redistributor: &Redistributor,
    progress: &dyn ProgressReporter,
) -> Vec<ChartPublishOutcome> {
    if charts.is_empty() {
        return Vec::new();
    }

    match endpoints.chart_repository_endpoint().await {
        Ok(endpoint) => {
            redistributor
                .publish_charts(charts, &endpoint.address, progress)
                .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "chart repository unreachable");
            let reason = e.to_string();
            charts
                .iter()
                .map(|c| ChartPublishOutcome::unreachable(c, &reason))
                .collect()
        }
    }
}
