//! Download charts pinned in a manifest from their Helm repositories
//!
//! Charts are fetched one at a time. Each chart gets its own throwaway cache
//! directory holding the repository index, removed once the chart is done.

use airlift_core::{ArtifactStatus, ChartSpec, ProgressReporter};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};
use crate::http::{HttpClient, digest_matches};
use crate::index::{RepositoryIndex, index_url};

/// A chart written to disk
#[derive(Debug, Clone)]
pub struct ChartArtifact {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub digest: String,
}

/// Result of fetching one chart
#[derive(Debug)]
pub struct ChartOutcome {
    pub spec: ChartSpec,
    pub result: Result<ChartArtifact>,
}

impl ChartOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fetches charts from HTTP Helm repositories
#[derive(Debug, Clone)]
pub struct ChartFetcher {
    client: HttpClient,
}

impl ChartFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?,
        })
    }

    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }

    /// Fetch one chart into `out_dir/<name>-<version>.tgz`
    pub async fn fetch(&self, spec: &ChartSpec, out_dir: &Path) -> Result<ChartArtifact> {
        let cache = tempfile::Builder::new()
            .prefix("airlift-chart-")
            .tempdir()?;

        let index_path = cache.path().join("index.yaml");
        self.client
            .download_to(&index_url(&spec.repo)?, &index_path)
            .await?;
        let index = RepositoryIndex::from_bytes(&tokio::fs::read(&index_path).await?)?;

        let entry = index.resolve(&spec.name, &spec.version, &spec.repo)?;
        let url = entry
            .resolved_download_url(&spec.repo)?
            .ok_or_else(|| RepoError::NoDownloadUrl {
                name: spec.name.clone(),
                version: spec.version.clone(),
            })?;

        tracing::debug!(chart = %spec.name, version = %spec.version, url = %url, "downloading chart");

        let dest = out_dir.join(spec.archive_name());
        let digest = self.client.download_to(&url, &dest).await?;

        if let Some(expected) = &entry.digest {
            if !digest_matches(expected, &digest) {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(RepoError::IntegrityCheckFailed {
                    name: spec.name.clone(),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        Ok(ChartArtifact {
            name: spec.name.clone(),
            version: spec.version.clone(),
            path: dest,
            digest,
        })
    }

    /// Fetch every chart in order, one outcome per spec
    pub async fn fetch_all(
        &self,
        specs: &[ChartSpec],
        out_dir: &Path,
        progress: &dyn ProgressReporter,
    ) -> Vec<ChartOutcome> {
        progress.phase("Fetching charts", specs.len());

        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let label = format!("{}-{}", spec.name, spec.version);
            progress.update(&label, ArtifactStatus::InProgress, None);

            let result = self.fetch(spec, out_dir).await;
            match &result {
                Ok(_) => progress.update(&label, ArtifactStatus::Done, None),
                Err(e) => {
                    tracing::warn!(chart = %label, error = %e, "chart fetch failed");
                    progress.update(&label, ArtifactStatus::Failed, Some(&e.to_string()));
                }
            }

            outcomes.push(ChartOutcome {
                spec: spec.clone(),
                result,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::compute_digest;
    use airlift_core::RecordingProgress;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHART_BYTES: &[u8] = b"fake chart archive";

    fn spec(name: &str, repo: &str, version: &str) -> ChartSpec {
        ChartSpec {
            name: name.to_string(),
            repo: repo.to_string(),
            version: version.to_string(),
            values_file: None,
        }
    }

    async fn repo_server(digest: &str) -> MockServer {
        let server = MockServer::start().await;
        let index = format!(
            r#"apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: 15.0.0
      digest: "{digest}"
      urls:
        - /charts/nginx-15.0.0.tgz
  empty:
    - name: empty
      version: 1.0.0
      urls: []
"#
        );
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/nginx-15.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CHART_BYTES.to_vec()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_chart_with_relative_url() {
        let server = repo_server(&compute_digest(CHART_BYTES)).await;
        let out = TempDir::new().unwrap();

        let fetcher = ChartFetcher::new().unwrap();
        let artifact = fetcher
            .fetch(&spec("nginx", &format!("{}/", server.uri()), "15.0.0"), out.path())
            .await
            .unwrap();

        assert_eq!(artifact.path, out.path().join("nginx-15.0.0.tgz"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), CHART_BYTES);
    }

    #[tokio::test]
    async fn test_root_relative_url_resolves_against_host() {
        let server = MockServer::start().await;
        let index = format!(
            "apiVersion: v1\nentries:\n  nginx:\n    - name: nginx\n      version: 15.0.0\n      digest: \"{}\"\n      urls:\n        - /charts/nginx-15.0.0.tgz\n",
            compute_digest(CHART_BYTES)
        );
        Mock::given(method("GET"))
            .and(path("/stable/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/nginx-15.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CHART_BYTES.to_vec()))
            .mount(&server)
            .await;
        let out = TempDir::new().unwrap();

        let artifact = ChartFetcher::new()
            .unwrap()
            .fetch(&spec("nginx", &format!("{}/stable", server.uri()), "15.0.0"), out.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&artifact.path).unwrap(), CHART_BYTES);
    }

    #[tokio::test]
    async fn test_missing_chart_and_version() {
        let server = repo_server(&compute_digest(CHART_BYTES)).await;
        let out = TempDir::new().unwrap();
        let fetcher = ChartFetcher::new().unwrap();

        let err = fetcher
            .fetch(&spec("postgres", &server.uri(), "1.0.0"), out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ChartNotFound { .. }));

        let err = fetcher
            .fetch(&spec("nginx", &server.uri(), "9.9.9"), out.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("9.9.9"));
        assert!(err.to_string().contains("nginx"));

        let err = fetcher
            .fetch(&spec("empty", &server.uri(), "1.0.0"), out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NoDownloadUrl { .. }));
    }

    #[tokio::test]
    async fn test_digest_mismatch_removes_download() {
        let server = repo_server("sha256:0000").await;
        let out = TempDir::new().unwrap();

        let err = ChartFetcher::new()
            .unwrap()
            .fetch(&spec("nginx", &server.uri(), "15.0.0"), out.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
        assert!(!out.path().join("nginx-15.0.0.tgz").exists());
    }

    #[tokio::test]
    async fn test_fetch_all_continues_past_failures() {
        let server = repo_server(&compute_digest(CHART_BYTES)).await;
        let out = TempDir::new().unwrap();
        let progress = RecordingProgress::new();

        let specs = vec![
            spec("postgres", &server.uri(), "1.0.0"),
            spec("nginx", &server.uri(), "15.0.0"),
        ];
        let outcomes = ChartFetcher::new()
            .unwrap()
            .fetch_all(&specs, out.path(), &progress)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        assert_eq!(
            progress.final_status("postgres-1.0.0"),
            Some(ArtifactStatus::Failed)
        );
        assert_eq!(
            progress.final_status("nginx-15.0.0"),
            Some(ArtifactStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_unreachable_repository() {
        let out = TempDir::new().unwrap();
        let err = ChartFetcher::new()
            .unwrap()
            .fetch(&spec("nginx", "http://127.0.0.1:1", "15.0.0"), out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NetworkError { .. }));
    }
}
