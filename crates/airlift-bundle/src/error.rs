//! Error types for bundle pipelines

use thiserror::Error;

use airlift_core::CoreError;
use airlift_repo::RepoError;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Some artifacts could not be fetched; nothing was packed
    #[error("{failed} of {total} artifacts failed to fetch:\n{report}")]
    FetchFailed {
        failed: usize,
        total: usize,
        report: String,
    },

    #[error("Artifact source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Container engine error: {message}")]
    Engine { message: String },

    #[error("Failed to publish chart {chart}: {message}")]
    Publish { chart: String, message: String },

    #[error("Endpoint unavailable: {message}")]
    Endpoint { message: String },

    #[error("Failed to install release {release}: {message}")]
    Install { release: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BundleError {
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        BundleError::Engine {
            message: message.into(),
        }
    }

    pub(crate) fn endpoint(message: impl Into<String>) -> Self {
        BundleError::Endpoint {
            message: message.into(),
        }
    }

    /// Whether this is a manifest validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, BundleError::Core(e) if e.is_validation())
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
