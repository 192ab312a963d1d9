//! Airlift Bundle - the build, unpack, push and deploy pipelines
//!
//! This crate ties the local file handling of `airlift-core` to the network
//! clients of `airlift-repo`:
//! - **Build**: fetch every artifact of a manifest and pack it into one bundle
//! - **Unpack**: extract a bundle on the disconnected side
//! - **Push**: redistribute images (registry API, container engine, manual
//!   steps) and publish charts to a ChartMuseum-style repository
//! - **Deploy**: install a bundled chart with its images pointed at the
//!   private registry
//!
//! External tools (`docker`, `kubectl`, `helm`) run behind [`CommandRunner`].

pub mod build;
pub mod deploy;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod install;
pub mod publish;
pub mod push;
pub mod redistribute;
pub mod source;
pub mod unpack;

pub use build::{BuildOptions, BuildReport, BuildSources, MANIFEST_FILE, RewriteFailure, build, build_manifest};
pub use deploy::{DeployOptions, DeployReport, deploy, find_chart, load_values};
pub use endpoint::{Endpoint, EndpointProvider, PortForwardEndpoints, ServicePort, StaticEndpoints};
pub use engine::{
    CommandOutput, CommandRunner, CommandSpec, ContainerEngine, ProcessRunner, ScriptedRunner,
    TunnelGuard,
};
pub use error::{BundleError, Result};
pub use install::{ChartInstaller, HelmCliInstaller};
pub use publish::{ChartPublishOutcome, ChartPublisher, UploadMethod};
pub use push::{PushOptions, PushReport, push};
pub use redistribute::{ImagePushOutcome, PushTier, Redistributor, RedistributorConfig};
pub use source::{ArtifactSource, OpenedSource};
pub use unpack::{bundled_manifest, unpack};
