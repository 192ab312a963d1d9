//! Airlift Repo - where bundle artifacts come from and go to
//!
//! - `charts`: sequential chart download from Helm HTTP repositories
//! - `images`: bounded-concurrency image pulls into docker archives
//! - `oci`: registry pull and push over the OCI distribution API
//! - `credentials`: explicit and Docker-config registry credentials

pub mod charts;
pub mod credentials;
pub mod docker_archive;
pub mod error;
pub mod http;
pub mod images;
pub mod index;
pub mod oci;

pub use charts::{ChartArtifact, ChartFetcher, ChartOutcome};
pub use credentials::{
    DockerConfig, RegistryCredentials, credentials_from_env, is_local_registry, resolve_auth,
};
pub use error::{RepoError, Result};
pub use http::HttpClient;
pub use images::{
    DEFAULT_PARALLELISM, ImageOutcome, ImagePuller, ImagePusher, RegistryPuller, RegistryPusher,
    fetch_images,
};
pub use index::{ChartEntry, RepositoryIndex};
pub use oci::{OciClient, PulledImage, parse_reference};
