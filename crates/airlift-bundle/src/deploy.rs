//! Install a bundled chart with its images pointed at the private registry

use std::path::{Path, PathBuf};

use airlift_core::{ValueNode, rewrite_values};

use crate::error::{BundleError, Result};
use crate::install::ChartInstaller;
use crate::source::list_matching;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_REGISTRY: &str = "localhost:5000";

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub chart_name: String,
    pub charts_dir: PathBuf,
    pub values_file: Option<PathBuf>,
    pub namespace: String,
    /// Defaults to the chart name
    pub release: Option<String>,
    pub registry: String,
}

impl DeployOptions {
    pub fn new(chart_name: impl Into<String>, charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            chart_name: chart_name.into(),
            charts_dir: charts_dir.into(),
            values_file: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            release: None,
            registry: DEFAULT_REGISTRY.to_string(),
        }
    }

    pub fn release_name(&self) -> &str {
        self.release.as_deref().unwrap_or(&self.chart_name)
    }
}

/// What a deploy installed
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub chart: PathBuf,
    pub release: String,
    pub namespace: String,
    pub rewritten: usize,
}

/// Locate `name` in `charts_dir`
///
/// Tries an exact entry, then `<name>.tgz`, then the first `<name>-*.tgz` by
/// name.
pub fn find_chart(charts_dir: &Path, name: &str) -> Result<PathBuf> {
    let exact = charts_dir.join(name);
    if exact.exists() {
        return Ok(exact);
    }

    let packaged = charts_dir.join(format!("{}.tgz", name));
    if packaged.is_file() {
        return Ok(packaged);
    }

    list_matching(charts_dir, &format!("{}-*.tgz", glob::Pattern::escape(name)))?
        .into_iter()
        .next()
        .ok_or_else(|| BundleError::SourceNotFound {
            path: exact.display().to_string(),
        })
}

/// Values from `path`, or an empty mapping
pub fn load_values(path: Option<&Path>) -> Result<ValueNode> {
    match path {
        Some(path) => Ok(ValueNode::from_file(path)?),
        None => Ok(ValueNode::default()),
    }
}

pub async fn deploy(options: &DeployOptions, installer: &dyn ChartInstaller) -> Result<DeployReport> {
    let chart = find_chart(&options.charts_dir, &options.chart_name)?;
    let mut values = load_values(options.values_file.as_deref())?;
    let rewritten = rewrite_values(&mut values, &options.registry);
    let release = options.release_name().to_string();

    tracing::info!(
        chart = %chart.display(),
        release = %release,
        namespace = %options.namespace,
        rewritten,
        "deploying chart"
    );
    installer
        .install(&chart, &release, &options.namespace, &values)
        .await?;

    Ok(DeployReport {
        chart,
        release,
        namespace: options.namespace.clone(),
        rewritten,
    })
}
