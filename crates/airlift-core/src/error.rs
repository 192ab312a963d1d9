//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid manifest: {message}")]
    Validation {
        /// Offending field, e.g. `images` or `charts.repo`
        field: String,
        /// Position of the offending entry in its list, if any
        index: Option<usize>,
        message: String,
    },

    #[error("Archive error at {path}: {message}")]
    Archive { path: String, message: String },

    #[error("Failed to rewrite chart {chart}: {message}")]
    Rewrite { chart: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn validation(
        field: impl Into<String>,
        index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::Validation {
            field: field.into(),
            index,
            message: message.into(),
        }
    }

    pub(crate) fn archive(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        CoreError::Archive {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn rewrite(chart: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Rewrite {
            chart: chart.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from manifest validation
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
