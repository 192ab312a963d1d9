//! Push command - redistribute a bundle into the target environment

use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use airlift_bundle::{
    ArtifactSource, EndpointProvider, PortForwardEndpoints, ProcessRunner, PushOptions, PushReport,
    Redistributor, RedistributorConfig, StaticEndpoints, push,
};
use airlift_core::TerminalProgress;
use airlift_repo::{DockerConfig, RegistryCredentials};

use crate::error::{CliError, Result};

pub struct PushArgs {
    pub source: PathBuf,
    pub registry: Option<String>,
    pub chart_repo: Option<String>,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub engine: String,
    pub publish_charts: bool,
    pub insecure_local: bool,
    pub credentials: Option<RegistryCredentials>,
    pub verbose: bool,
}

pub async fn run(args: PushArgs) -> Result<()> {
    let source = ArtifactSource::from_path(&args.source)?;

    let mut publish_charts = args.publish_charts;
    let endpoints: Box<dyn EndpointProvider> = match &args.registry {
        Some(registry) => {
            if publish_charts && args.chart_repo.is_none() {
                println!(
                    "  {} no --chart-repo given, charts will not be published",
                    style("Note:").dim()
                );
                publish_charts = false;
            }
            Box::new(StaticEndpoints::new(Some(registry.clone()), args.chart_repo.clone()))
        }
        None => Box::new(
            PortForwardEndpoints::new(Arc::new(ProcessRunner), args.namespace.clone())
                .with_kubeconfig(args.kubeconfig.clone()),
        ),
    };

    let config = RedistributorConfig {
        engine_program: args.engine.clone(),
        insecure_local: args.insecure_local,
    };
    let docker_config = DockerConfig::load_default();
    let redistributor = Redistributor::new(config, docker_config)?;

    println!(
        "{} {}",
        style("Pushing").cyan().bold(),
        args.source.display()
    );

    let options = PushOptions {
        source,
        credentials: args.credentials,
        publish_charts,
    };
    let progress = if args.verbose {
        TerminalProgress::new().verbose()
    } else {
        TerminalProgress::new()
    };

    let report = push(&options, endpoints.as_ref(), &redistributor, &progress).await?;
    print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::PushFailed {
            images: report.failed_images(),
            charts: report.failed_charts(),
        })
    }
}

fn print_report(report: &PushReport) {
    println!();
    for outcome in &report.images {
        match outcome.delivered_by {
            Some(tier) => println!(
                "  {} {} {}",
                style("✓").green(),
                outcome.target,
                style(format!("via {}", tier)).dim()
            ),
            None => {
                println!("  {} {}", style("✗").red(), outcome.target);
                for attempt in &outcome.attempts {
                    println!("      {}", style(attempt).dim());
                }
                if let Some(steps) = &outcome.remediation {
                    println!("{}", indent(steps));
                }
            }
        }
    }

    for outcome in &report.charts {
        let name = outcome
            .chart
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if outcome.is_ok() {
            println!("  {} {}", style("✓").green(), name);
        } else {
            println!("  {} {}", style("✗").red(), name);
            for attempt in &outcome.attempts {
                println!("      {}", style(attempt).dim());
            }
            if let Some(steps) = &outcome.remediation {
                println!("{}", indent(steps));
            }
        }
    }

    println!();
    println!(
        "{} {}/{} image(s), {}/{} chart(s)",
        style("Delivered").bold(),
        report.images.len() - report.failed_images(),
        report.images.len(),
        report.charts.len() - report.failed_charts(),
        report.charts.len()
    );
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("      {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
