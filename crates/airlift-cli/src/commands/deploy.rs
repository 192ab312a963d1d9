//! Deploy command - install a bundled chart

use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use airlift_bundle::{DeployOptions, HelmCliInstaller, ProcessRunner, deploy};

use crate::error::Result;

pub async fn run(
    chart: &str,
    charts_dir: &Path,
    values: Option<PathBuf>,
    namespace: &str,
    release: Option<String>,
    registry: &str,
    kubeconfig: Option<PathBuf>,
) -> Result<()> {
    let options = DeployOptions {
        chart_name: chart.to_string(),
        charts_dir: charts_dir.to_path_buf(),
        values_file: values,
        namespace: namespace.to_string(),
        release,
        registry: registry.to_string(),
    };

    println!(
        "{} {} as {} in namespace {}",
        style("Deploying").cyan().bold(),
        options.chart_name,
        options.release_name(),
        options.namespace
    );

    let installer = HelmCliInstaller::new(Arc::new(ProcessRunner)).with_kubeconfig(kubeconfig);
    let report = deploy(&options, &installer).await?;

    println!(
        "  {} {} ({} image field(s) pointed at {})",
        style("Installed").green().bold(),
        report.chart.display(),
        report.rewritten,
        registry
    );
    Ok(())
}
