//! CLI error types with exit code handling
//!
//! Library errors are folded into `CliError` so every failure carries a
//! diagnostic code and maps to one exit code.

#![allow(dead_code)]

use miette::Diagnostic;
use thiserror::Error;

use airlift_bundle::BundleError;
use airlift_core::CoreError;
use airlift_repo::RepoError;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid manifest or options
    #[error("Validation failed: {message}")]
    #[diagnostic(code(airlift::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Artifacts could not be downloaded; no bundle was written
    #[error("{message}")]
    #[diagnostic(code(airlift::cli::fetch))]
    Fetch {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Archive or chart rewrite failure
    #[error("Bundle error: {message}")]
    #[diagnostic(code(airlift::cli::bundle))]
    Bundle {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Some artifacts were not delivered
    #[error("Push incomplete: {images} image(s) and {charts} chart(s) not delivered")]
    #[diagnostic(
        code(airlift::cli::push),
        help("Run the manual steps printed above from a host that can reach the target")
    )]
    PushFailed { images: usize, charts: usize },

    /// Chart installation failed
    #[error("Deploy failed: {message}")]
    #[diagnostic(code(airlift::cli::deploy))]
    Deploy {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(airlift::cli::io))]
    Io { message: String },

    /// Network or registry failure outside a fetch batch
    #[error("{message}")]
    #[diagnostic(code(airlift::cli::error))]
    Other { message: String },

    #[error("Internal error: {message}")]
    #[diagnostic(code(airlift::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Fetch { .. } => exit_codes::FETCH_ERROR,
            CliError::Bundle { .. } => exit_codes::BUNDLE_ERROR,
            CliError::PushFailed { .. } => exit_codes::PUSH_ERROR,
            CliError::Deploy { .. } => exit_codes::ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::validation(message)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { .. } => CliError::validation_with_help(
                err.to_string(),
                "A manifest needs at least one image or chart, and every chart needs name, repo and version",
            ),
            CoreError::Io(e) => CliError::from(e),
            other => CliError::Bundle {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::AuthFailed { .. } => CliError::validation(err.to_string()),
            RepoError::Io(e) => CliError::from(e),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<BundleError> for CliError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Core(e) => CliError::from(e),
            BundleError::Repo(e) => CliError::from(e),
            BundleError::FetchFailed { .. } => CliError::Fetch {
                message: err.to_string(),
                help: Some("Check registry credentials and network access, then rerun the build".to_string()),
            },
            BundleError::SourceNotFound { path } => CliError::Io {
                message: format!("not found: {}", path),
            },
            BundleError::Install { .. } => CliError::Deploy {
                message: err.to_string(),
                help: Some("Check that helm can reach the cluster (--kubeconfig)".to_string()),
            },
            BundleError::Io(e) => CliError::from(e),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<miette::Report> for CliError {
    fn from(err: miette::Report) -> Self {
        CliError::Other {
            message: format!("{:?}", err),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
