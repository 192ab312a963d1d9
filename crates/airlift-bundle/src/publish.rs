//! Upload packaged charts to a ChartMuseum-compatible repository
//!
//! A multipart upload is tried first, then a raw `application/gzip` body.
//! When both fail the outcome carries a `curl` command that does the same
//! upload by hand.

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BundleError, Result};

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// How a chart made it into the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    Multipart,
    RawGzip,
}

/// Result of publishing one chart
#[derive(Debug, Clone)]
pub struct ChartPublishOutcome {
    pub chart: PathBuf,
    pub upload_url: String,
    /// `None` when every upload attempt failed
    pub method: Option<UploadMethod>,
    /// Failure message of each attempt, in order
    pub attempts: Vec<String>,
    /// Commands to run by hand after a failure
    pub remediation: Option<String>,
}

impl ChartPublishOutcome {
    pub fn is_ok(&self) -> bool {
        self.method.is_some()
    }

    /// Outcome for a chart that could not be attempted at all
    pub fn unreachable(chart: &Path, reason: &str) -> Self {
        Self {
            chart: chart.to_path_buf(),
            upload_url: String::new(),
            method: None,
            attempts: vec![format!("target unreachable: {}", reason)],
            remediation: None,
        }
    }
}

/// `http://` is assumed when the endpoint has no scheme
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

/// Instructions for uploading a chart by hand
pub fn manual_upload_steps(chart: &Path, upload_url: &str) -> String {
    format!(
        "Manual chart upload steps:\n  curl -X POST -F 'chart=@{}' {}",
        chart.display(),
        upload_url
    )
}

#[derive(Debug, Clone)]
pub struct ChartPublisher {
    client: reqwest::Client,
}

impl ChartPublisher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BundleError::Publish {
                chart: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Whether `<endpoint>/health` answers 200 within [`HEALTH_TIMEOUT`]
    pub async fn check_health(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", normalize_endpoint(endpoint));
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "chart repository health check returned non-OK status");
                false
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "chart repository health check failed");
                false
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<(), String> {
        let response = request
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("upload failed with status {}: {}", status.as_u16(), body.trim()))
    }

    /// Publish one chart archive
    ///
    /// The health check only warns. Upload errors never propagate; they end up
    /// in the returned outcome.
    pub async fn publish(&self, chart: &Path, endpoint: &str) -> ChartPublishOutcome {
        let base = normalize_endpoint(endpoint);
        let upload_url = format!("{}/api/charts", base);
        let mut outcome = ChartPublishOutcome {
            chart: chart.to_path_buf(),
            upload_url: upload_url.clone(),
            method: None,
            attempts: Vec::new(),
            remediation: None,
        };

        let data = match tokio::fs::read(chart).await {
            Ok(data) => data,
            Err(e) => {
                outcome.attempts.push(format!("failed to read chart: {}", e));
                return outcome;
            }
        };
        let file_name = chart
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "chart.tgz".to_string());

        self.check_health(&base).await;

        let form = Form::new().part("chart", Part::bytes(data.clone()).file_name(file_name.clone()));
        match self.send(self.client.post(&upload_url).multipart(form)).await {
            Ok(()) => {
                tracing::debug!(chart = %file_name, url = %upload_url, "chart published");
                outcome.method = Some(UploadMethod::Multipart);
                return outcome;
            }
            Err(e) => {
                tracing::warn!(chart = %file_name, error = %e, "multipart upload failed, retrying as raw gzip");
                outcome.attempts.push(e);
            }
        }

        let raw = self
            .client
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(data);
        match self.send(raw).await {
            Ok(()) => {
                tracing::debug!(chart = %file_name, url = %upload_url, "chart published as raw gzip");
                outcome.method = Some(UploadMethod::RawGzip);
            }
            Err(e) => {
                tracing::warn!(chart = %file_name, error = %e, "raw upload failed");
                outcome.attempts.push(e);
                outcome.remediation = Some(manual_upload_steps(chart, &upload_url));
            }
        }
        outcome
    }
}
