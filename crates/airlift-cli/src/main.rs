//! Airlift CLI - carry container images and Helm charts into air-gapped clusters

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use airlift_bundle::deploy::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY};
use airlift_repo::{DEFAULT_PARALLELISM, RegistryCredentials};

mod commands;
mod error;
mod exit_codes;
mod util;

use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "airlift")]
#[command(author = "Airlift Contributors")]
#[command(version)]
#[command(about = "Carry container images and Helm charts into air-gapped Kubernetes clusters", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

/// Registry credentials, from flags or the environment
#[derive(Args, Debug, Clone)]
struct RegistryAuth {
    /// Registry username
    #[arg(long, env = "AIRLIFT_REGISTRY_USERNAME")]
    username: Option<String>,

    /// Registry password
    #[arg(long, env = "AIRLIFT_REGISTRY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl RegistryAuth {
    fn credentials(&self) -> Result<Option<RegistryCredentials>> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Ok(Some(RegistryCredentials::new(u, p))),
            (None, None) => Ok(None),
            _ => Err(CliError::validation(
                "--username and --password must be given together",
            )),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every image and chart of a manifest into one bundle
    Build {
        /// Manifest file
        #[arg(short, long, default_value = "manifest.yaml")]
        manifest: PathBuf,

        /// Bundle file to write
        #[arg(short, long, default_value = "airlift-bundle.tar.gz")]
        output: PathBuf,

        /// Concurrent image pulls
        #[arg(short = 'j', long, env = "AIRLIFT_PARALLEL", default_value_t = DEFAULT_PARALLELISM)]
        parallel: usize,

        /// Point chart image references at this registry
        #[arg(long, value_name = "REGISTRY")]
        rewrite_registry: Option<String>,

        /// Fail the build when a chart cannot be rewritten
        #[arg(long, requires = "rewrite_registry")]
        strict_rewrite: bool,

        #[command(flatten)]
        auth: RegistryAuth,
    },

    /// Extract a bundle
    Unpack {
        /// Bundle file
        bundle: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Push images and charts from a bundle or unpacked directory
    Push {
        /// Bundle file or unpacked directory
        source: PathBuf,

        /// Target registry; port-forwards to the in-cluster registry when unset
        #[arg(long, env = "AIRLIFT_REGISTRY")]
        registry: Option<String>,

        /// Chart repository URL (ChartMuseum API)
        #[arg(long)]
        chart_repo: Option<String>,

        /// Namespace of the in-cluster registry and chart repository
        #[arg(short, long, default_value = "airlift-registry")]
        namespace: String,

        /// Path to kubeconfig file
        #[arg(long)]
        kubeconfig: Option<PathBuf>,

        /// Container engine used when the registry API push fails
        #[arg(long, default_value = "docker")]
        engine: String,

        /// Do not publish charts
        #[arg(long)]
        skip_charts: bool,

        /// Require TLS even for local registries
        #[arg(long)]
        secure: bool,

        #[command(flatten)]
        auth: RegistryAuth,
    },

    /// Compare image references in bundled charts with the manifest
    Analyze {
        /// Unpacked bundle directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Install a bundled chart with images from the private registry
    Deploy {
        /// Chart name
        chart: String,

        /// Directory holding chart archives
        #[arg(long, default_value = "charts")]
        charts_dir: PathBuf,

        /// Values file
        #[arg(short = 'f', long = "values")]
        values: Option<PathBuf>,

        /// Target namespace
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,

        /// Release name (defaults to the chart name)
        #[arg(long)]
        release: Option<String>,

        /// Registry images are served from
        #[arg(long, env = "AIRLIFT_REGISTRY", default_value = DEFAULT_REGISTRY)]
        registry: String,

        /// Path to kubeconfig file
        #[arg(long)]
        kubeconfig: Option<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            manifest,
            output,
            parallel,
            rewrite_registry,
            strict_rewrite,
            auth,
        } => {
            commands::build::run(
                &manifest,
                &output,
                parallel,
                rewrite_registry,
                strict_rewrite,
                auth.credentials()?,
                cli.debug,
            )
            .await
        }

        Commands::Unpack { bundle, output } => commands::unpack::run(&bundle, &output),

        Commands::Push {
            source,
            registry,
            chart_repo,
            namespace,
            kubeconfig,
            engine,
            skip_charts,
            secure,
            auth,
        } => {
            commands::push::run(commands::push::PushArgs {
                source,
                registry,
                chart_repo,
                namespace,
                kubeconfig,
                engine,
                publish_charts: !skip_charts,
                insecure_local: !secure,
                credentials: auth.credentials()?,
                verbose: cli.debug,
            })
            .await
        }

        Commands::Analyze { dir } => commands::analyze::run(&dir),

        Commands::Deploy {
            chart,
            charts_dir,
            values,
            namespace,
            release,
            registry,
            kubeconfig,
        } => {
            commands::deploy::run(
                &chart,
                &charts_dir,
                values,
                &namespace,
                release,
                &registry,
                kubeconfig,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
