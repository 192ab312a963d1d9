//! Build command - fetch a manifest's artifacts into a bundle

use console::style;
use std::path::Path;
use std::sync::Arc;

use airlift_bundle::{BuildOptions, BuildSources, build, build_manifest};
use airlift_core::{Manifest, ProgressReporter, RewriteOptions, TerminalProgress};
use airlift_repo::RegistryCredentials;

use crate::error::{CliError, Result};
use crate::util::{format_size, short_digest};

pub async fn run(
    manifest_path: &Path,
    output: &Path,
    parallel: usize,
    rewrite_registry: Option<String>,
    strict_rewrite: bool,
    credentials: Option<RegistryCredentials>,
    verbose: bool,
) -> Result<()> {
    if parallel == 0 {
        return Err(CliError::input("--parallel must be at least 1"));
    }

    let mut options = BuildOptions::new(manifest_path, output);
    options.parallelism = parallel;
    options.rewrite = RewriteOptions {
        target_registry: rewrite_registry,
        strict: strict_rewrite,
    };

    println!(
        "{} {} -> {}",
        style("Building").cyan().bold(),
        manifest_path.display(),
        output.display()
    );

    let progress: Arc<dyn ProgressReporter> = if verbose {
        Arc::new(TerminalProgress::new().verbose())
    } else {
        Arc::new(TerminalProgress::new())
    };

    let report = match credentials {
        None => build(&options, progress).await?,
        Some(credentials) => {
            let manifest = Manifest::load(manifest_path)?;
            let sources = BuildSources::remote(Some(credentials))?;
            build_manifest(&manifest, &options, &sources, progress).await?
        }
    };

    println!();
    println!("{}:", style("Images").bold());
    for image in &report.images {
        println!(
            "  {} {} {}",
            style("✓").green(),
            image.reference,
            style(format!("{} sha256:{}", format_size(image.size), short_digest(&image.digest, 12))).dim()
        );
    }

    if !report.charts.is_empty() {
        println!("{}:", style("Charts").bold());
        for chart in &report.charts {
            println!("  {} {}-{}", style("✓").green(), chart.name, chart.version);
        }
    }

    for (chart, changed) in &report.rewritten {
        println!(
            "  {} {} ({} field(s))",
            style("Rewrote").cyan(),
            chart,
            changed
        );
    }
    for failure in &report.rewrite_failures {
        println!(
            "  {} could not rewrite {}: {}",
            style("Warning:").yellow().bold(),
            failure.chart,
            failure.message
        );
    }

    if !report.missing_images.is_empty() {
        println!();
        println!(
            "{} charts reference images that are not in the manifest:",
            style("Warning:").yellow().bold()
        );
        for image in &report.missing_images {
            println!("  - {}", image);
        }
    }

    println!();
    println!(
        "{} {} ({})",
        style("Created").green().bold(),
        report.output.display(),
        format_size(report.size)
    );

    Ok(())
}
