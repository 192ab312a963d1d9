//! Build a bundle from a manifest
//!
//! ```text
//! manifest ─▶ validate ─▶ fetch images ∥ ─▶ fetch charts ─▶ copy values
//!          ─▶ analyze charts ─▶ rewrite charts ─▶ pack
//! ```
//!
//! Artifacts are staged in a temporary directory that is removed whatever the
//! outcome. Packing only starts once every fetch has succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use airlift_core::{
    Manifest, ProgressReporter, RewriteOptions, analyze_chart_archive, find_images_not_in_manifest,
    rewrite_chart_archive, write_archive,
};
use airlift_repo::{
    ChartArtifact, ChartFetcher, DEFAULT_PARALLELISM, DockerConfig, ImagePuller, PulledImage,
    RegistryCredentials, RegistryPuller, fetch_images,
};

use crate::error::{BundleError, Result};
use crate::source::{CHARTS_DIR, IMAGES_DIR};

pub const MANIFEST_FILE: &str = "manifest.yaml";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub manifest_path: PathBuf,
    pub output_path: PathBuf,
    /// Concurrent image pulls
    pub parallelism: usize,
    pub rewrite: RewriteOptions,
}

impl BuildOptions {
    pub fn new(manifest_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            output_path: output_path.into(),
            parallelism: DEFAULT_PARALLELISM,
            rewrite: RewriteOptions::default(),
        }
    }
}

/// Where a build gets its artifacts from
pub struct BuildSources {
    pub images: Arc<dyn ImagePuller>,
    pub charts: ChartFetcher,
}

impl BuildSources {
    /// Remote registries and chart repositories, authenticated with
    /// `credentials` or the Docker config
    pub fn remote(credentials: Option<RegistryCredentials>) -> Result<Self> {
        let docker_config = DockerConfig::load_default();
        Ok(Self {
            images: Arc::new(RegistryPuller::new(docker_config, credentials)),
            charts: ChartFetcher::new()?,
        })
    }
}

/// A chart whose image references could not be rewritten
#[derive(Debug, Clone)]
pub struct RewriteFailure {
    pub chart: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub output: PathBuf,
    /// Bundle size in bytes
    pub size: u64,
    pub images: Vec<PulledImage>,
    pub charts: Vec<ChartArtifact>,
    /// Chart file name and number of rewritten fields
    pub rewritten: Vec<(String, usize)>,
    pub rewrite_failures: Vec<RewriteFailure>,
    /// Images charts reference that the manifest does not ship
    pub missing_images: Vec<String>,
}

/// Build a bundle, pulling from remote sources
pub async fn build(options: &BuildOptions, progress: Arc<dyn ProgressReporter>) -> Result<BuildReport> {
    let manifest = Manifest::load(&options.manifest_path)?;
    let sources = BuildSources::remote(None)?;
    build_manifest(&manifest, options, &sources, progress).await
}

/// Build a bundle from an already loaded manifest
pub async fn build_manifest(
    manifest: &Manifest,
    options: &BuildOptions,
    sources: &BuildSources,
    progress: Arc<dyn ProgressReporter>,
) -> Result<BuildReport> {
    manifest.validate()?;
    tracing::info!(
        images = manifest.images.len(),
        charts = manifest.charts.len(),
        "building bundle"
    );

    let staging = tempfile::Builder::new().prefix("airlift-build-").tempdir()?;
    let images_dir = staging.path().join(IMAGES_DIR);
    let charts_dir = staging.path().join(CHARTS_DIR);
    std::fs::create_dir_all(&images_dir)?;
    std::fs::create_dir_all(&charts_dir)?;

    let image_outcomes = fetch_images(
        sources.images.clone(),
        &manifest.images,
        &images_dir,
        options.parallelism,
        progress.clone(),
    )
    .await;
    let chart_outcomes = sources
        .charts
        .fetch_all(&manifest.charts, &charts_dir, progress.as_ref())
        .await;

    let total = image_outcomes.len() + chart_outcomes.len();
    let mut failures = Vec::new();
    let mut images = Vec::new();
    let mut charts = Vec::new();

    for outcome in image_outcomes {
        match outcome.result {
            Ok(image) => images.push(image),
            Err(e) => failures.push(format!("  image {}: {}", outcome.reference, e)),
        }
    }
    for outcome in chart_outcomes {
        match outcome.result {
            Ok(chart) => charts.push(chart),
            Err(e) => failures.push(format!(
                "  chart {}-{}: {}",
                outcome.spec.name, outcome.spec.version, e
            )),
        }
    }

    if !failures.is_empty() {
        return Err(BundleError::FetchFailed {
            failed: failures.len(),
            total,
            report: failures.join("\n"),
        });
    }

    copy_values_files(manifest, &charts_dir)?;
    manifest.save(&staging.path().join(MANIFEST_FILE))?;

    let missing_images = reconcile(manifest, &charts);

    let mut rewritten = Vec::new();
    let mut rewrite_failures = Vec::new();
    if let Some(target) = &options.rewrite.target_registry {
        progress.phase("Rewriting chart images", charts.len());
        for chart in &charts {
            let label = format!("{}-{}", chart.name, chart.version);
            match rewrite_chart_archive(&chart.path, target) {
                Ok(changed) => rewritten.push((label, changed)),
                Err(e) if options.rewrite.strict => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(chart = %label, error = %e, "chart rewrite failed, keeping original");
                    rewrite_failures.push(RewriteFailure {
                        chart: label,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    if let Some(parent) = options.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_archive(staging.path(), &options.output_path)?;
    let size = std::fs::metadata(&options.output_path)?.len();

    tracing::info!(output = %options.output_path.display(), size, "bundle written");

    Ok(BuildReport {
        output: options.output_path.clone(),
        size,
        images,
        charts,
        rewritten,
        rewrite_failures,
        missing_images,
    })
}

/// Copy each chart's values file to `charts/<file name>`
fn copy_values_files(manifest: &Manifest, charts_dir: &Path) -> Result<()> {
    for chart in &manifest.charts {
        let Some(values_file) = &chart.values_file else {
            continue;
        };
        let Some(file_name) = values_file.file_name() else {
            continue;
        };
        std::fs::copy(values_file, charts_dir.join(file_name))?;
        tracing::debug!(chart = %chart.name, file = %values_file.display(), "copied values file");
    }
    Ok(())
}

/// Images referenced by the fetched charts but absent from the manifest
fn reconcile(manifest: &Manifest, charts: &[ChartArtifact]) -> Vec<String> {
    let mut references = Vec::new();
    for chart in charts {
        match analyze_chart_archive(&chart.path) {
            Ok(analysis) => references.extend(analysis.references),
            Err(e) => tracing::warn!(chart = %chart.name, error = %e, "chart analysis failed"),
        }
    }

    let missing = find_images_not_in_manifest(&references, &manifest.images);
    for image in &missing {
        tracing::warn!(image = %image, "image referenced by a chart is not in the manifest");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::{ChartSpec, CoreError, NoopProgress, list_archive};
    use airlift_repo::RepoError;
    use airlift_repo::http::compute_digest;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakePuller;

    #[async_trait]
    impl ImagePuller for FakePuller {
        async fn pull(&self, reference: &str, dest: &Path) -> airlift_repo::Result<PulledImage> {
            if reference.contains("missing") {
                return Err(RepoError::Pull {
                    reference: reference.to_string(),
                    message: "manifest unknown".to_string(),
                });
            }
            std::fs::write(dest, reference.as_bytes())?;
            Ok(PulledImage {
                reference: reference.to_string(),
                path: dest.to_path_buf(),
                digest: compute_digest(reference.as_bytes()),
                size: reference.len() as u64,
            })
        }
    }

    fn chart_tgz(dir: &Path) -> Vec<u8> {
        let tree = dir.join("chart-tree");
        std::fs::create_dir_all(tree.join("nginx/templates")).unwrap();
        std::fs::write(tree.join("nginx/Chart.yaml"), "name: nginx\nversion: 15.0.0\n").unwrap();
        std::fs::write(
            tree.join("nginx/values.yaml"),
            "image:\n  registry: docker.io\n  repository: bitnami/nginx\n  tag: \"1.25\"\nsidecar:\n  image: busybox\n  tag: \"1.36\"\n",
        )
        .unwrap();
        let out = dir.join("nginx-15.0.0.tgz");
        write_archive(&tree, &out).unwrap();
        std::fs::read(out).unwrap()
    }

    /// A chart with no values.yaml, which cannot be rewritten
    fn bare_chart_tgz(dir: &Path) -> Vec<u8> {
        let tree = dir.join("bare-tree");
        std::fs::create_dir_all(tree.join("nginx/templates")).unwrap();
        std::fs::write(tree.join("nginx/Chart.yaml"), "name: nginx\nversion: 15.0.0\n").unwrap();
        let out = dir.join("bare-nginx-15.0.0.tgz");
        write_archive(&tree, &out).unwrap();
        std::fs::read(out).unwrap()
    }

    async fn chart_repo(chart: Vec<u8>) -> MockServer {
        let server = MockServer::start().await;
        let index = "apiVersion: v1\nentries:\n  nginx:\n    - name: nginx\n      version: 15.0.0\n      urls: [nginx-15.0.0.tgz]\n";
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nginx-15.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(chart))
            .mount(&server)
            .await;
        server
    }

    fn sources() -> BuildSources {
        BuildSources {
            images: Arc::new(FakePuller),
            charts: ChartFetcher::new().unwrap(),
        }
    }

    fn manifest(images: &[&str], repo: &str, values_file: Option<PathBuf>) -> Manifest {
        Manifest {
            images: images.iter().map(|s| s.to_string()).collect(),
            charts: vec![ChartSpec {
                name: "nginx".to_string(),
                repo: repo.to_string(),
                version: "15.0.0".to_string(),
                values_file,
            }],
        }
    }

    #[tokio::test]
    async fn test_build_bundle_layout() {
        let temp = TempDir::new().unwrap();
        let server = chart_repo(chart_tgz(temp.path())).await;
        let values = temp.path().join("nginx-values.yaml");
        std::fs::write(&values, "replicaCount: 2\n").unwrap();

        let manifest = manifest(&["bitnami/nginx:1.25"], &server.uri(), Some(values));
        let options = BuildOptions::new(
            temp.path().join("manifest.yaml"),
            temp.path().join("out/bundle.tar.gz"),
        );

        let report = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap();

        assert!(report.size > 0);
        let mut names: Vec<String> = list_archive(&report.output)
            .unwrap()
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.path)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "charts/nginx-15.0.0.tgz",
                "charts/nginx-values.yaml",
                "images/bitnami_nginx_1.25.tar",
                "manifest.yaml",
            ]
        );
        assert_eq!(report.missing_images, vec!["busybox:1.36"]);
        assert!(report.rewritten.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_before_packing() {
        let temp = TempDir::new().unwrap();
        let server = chart_repo(chart_tgz(temp.path())).await;
        let manifest = manifest(&["app/missing:v1", "app/ok:v1"], &server.uri(), None);
        let options = BuildOptions::new("manifest.yaml", temp.path().join("bundle.tar.gz"));

        let err = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap_err();

        match err {
            BundleError::FetchFailed { failed, total, report } => {
                assert_eq!((failed, total), (1, 3));
                assert!(report.contains("app/missing:v1"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!options.output_path.exists());
    }

    #[tokio::test]
    async fn test_build_with_rewrite() {
        let temp = TempDir::new().unwrap();
        let server = chart_repo(chart_tgz(temp.path())).await;
        let manifest = manifest(&["bitnami/nginx:1.25", "busybox:1.36"], &server.uri(), None);
        let mut options = BuildOptions::new("manifest.yaml", temp.path().join("bundle.tar.gz"));
        options.rewrite.target_registry = Some("registry.local:5000".to_string());

        let report = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap();

        assert!(report.missing_images.is_empty());
        assert_eq!(report.rewritten.len(), 1);
        assert!(report.rewritten[0].1 > 0);
        assert!(report.rewrite_failures.is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_failure_is_reported_when_not_strict() {
        let temp = TempDir::new().unwrap();
        let server = chart_repo(bare_chart_tgz(temp.path())).await;
        let manifest = manifest(&["bitnami/nginx:1.25"], &server.uri(), None);
        let mut options = BuildOptions::new("manifest.yaml", temp.path().join("bundle.tar.gz"));
        options.rewrite.target_registry = Some("registry.local:5000".to_string());

        let report = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap();

        assert!(report.rewritten.is_empty());
        assert_eq!(report.rewrite_failures.len(), 1);
        assert_eq!(report.rewrite_failures[0].chart, "nginx-15.0.0");
        assert!(report.rewrite_failures[0].message.contains("values.yaml"));
        assert!(options.output_path.exists());
    }

    #[tokio::test]
    async fn test_rewrite_failure_aborts_when_strict() {
        let temp = TempDir::new().unwrap();
        let server = chart_repo(bare_chart_tgz(temp.path())).await;
        let manifest = manifest(&["bitnami/nginx:1.25"], &server.uri(), None);
        let mut options = BuildOptions::new("manifest.yaml", temp.path().join("bundle.tar.gz"));
        options.rewrite.target_registry = Some("registry.local:5000".to_string());
        options.rewrite.strict = true;

        let err = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap_err();

        assert!(matches!(err, BundleError::Core(CoreError::Rewrite { .. })));
        assert!(!options.output_path.exists());
    }

    #[tokio::test]
    async fn test_invalid_manifest_has_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::default();
        let options = BuildOptions::new("manifest.yaml", temp.path().join("bundle.tar.gz"));

        let err = build_manifest(&manifest, &options, &sources(), Arc::new(NoopProgress))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!options.output_path.exists());
    }
}
