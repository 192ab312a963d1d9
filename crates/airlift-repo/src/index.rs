//! Helm repository index (`index.yaml`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{RepoError, Result};

/// Repository index (Helm-compatible)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Get all versions of a chart
    pub fn get(&self, name: &str) -> Option<&Vec<ChartEntry>> {
        self.entries.get(name)
    }

    /// Get a specific version of a chart
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version == version)
    }

    /// Find the entry for `name` at `version`
    ///
    /// Distinguishes an unknown chart from an unknown version.
    pub fn resolve(&self, name: &str, version: &str, repo: &str) -> Result<&ChartEntry> {
        let versions = self.entries.get(name).ok_or_else(|| RepoError::ChartNotFound {
            name: name.to_string(),
            repo: repo.to_string(),
        })?;

        versions
            .iter()
            .find(|e| e.version == version)
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

/// Chart entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    /// Chart name
    pub name: String,

    /// Chart version
    pub version: String,

    /// Application version
    #[serde(default)]
    pub app_version: Option<String>,

    /// Description
    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    /// Creation timestamp, as written by the repository
    #[serde(default)]
    pub created: Option<String>,

    /// Deprecated flag
    #[serde(default)]
    pub deprecated: bool,
}

impl ChartEntry {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Primary download URL, resolved against the repository base when relative
    pub fn resolved_download_url(&self, repo_url: &str) -> Result<Option<String>> {
        let Some(location) = self.download_url() else {
            return Ok(None);
        };
        let resolved = repository_base(repo_url)?.join(location).map_err(|e| {
            RepoError::InvalidRepositoryUrl {
                url: location.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some(resolved.to_string()))
    }
}

/// URL of the index file of a repository
pub fn index_url(repo_url: &str) -> Result<String> {
    Ok(repository_base(repo_url)?.join("index.yaml")?.to_string())
}

/// Repository URL as a join base; the trailing slash keeps its last path segment
fn repository_base(repo_url: &str) -> Result<Url> {
    let base = if repo_url.ends_with('/') {
        repo_url.to_string()
    } else {
        format!("{}/", repo_url)
    };
    Url::parse(&base).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: repo_url.to_string(),
        reason: e.to_string(),
    })
}
