//! Bundle manifest: the declared set of images and charts
//!
//! ```yaml
//! images:
//!   - bitnami/nginx:1.25
//! charts:
//!   - name: nginx
//!     repo: https://charts.bitnami.com/bitnami
//!     version: 15.0.0
//!     valuesFile: ./nginx-values.yaml
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Declarative list of images and charts to bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub charts: Vec<ChartSpec>,
}

/// A Helm chart pinned to a repository and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub name: String,
    pub repo: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<PathBuf>,
}

impl ChartSpec {
    /// File name of the chart archive inside a bundle (`<name>-<version>.tgz`)
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::parse(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse without validating
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Write the manifest as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the manifest, failing on the first violation
    ///
    /// Images are checked before charts, each in declaration order. Relative
    /// values file paths are resolved against the current directory.
    pub fn validate(&self) -> Result<()> {
        if self.images.is_empty() && self.charts.is_empty() {
            return Err(CoreError::validation(
                "manifest",
                None,
                "manifest must contain at least one image or chart",
            ));
        }

        for (i, image) in self.images.iter().enumerate() {
            if image.trim().is_empty() {
                return Err(CoreError::validation(
                    "images",
                    Some(i),
                    format!("image at index {} is empty", i),
                ));
            }
        }

        for (i, chart) in self.charts.iter().enumerate() {
            if chart.name.trim().is_empty() {
                return Err(CoreError::validation(
                    "charts.name",
                    Some(i),
                    format!("chart at index {} has no name", i),
                ));
            }
            if chart.repo.trim().is_empty() {
                return Err(CoreError::validation(
                    "charts.repo",
                    Some(i),
                    format!("chart at index {} has no repository", i),
                ));
            }
            if chart.version.trim().is_empty() {
                return Err(CoreError::validation(
                    "charts.version",
                    Some(i),
                    format!("chart at index {} has no version", i),
                ));
            }
            if let Some(values_file) = &chart.values_file {
                if !values_file.exists() {
                    return Err(CoreError::validation(
                        "charts.valuesFile",
                        Some(i),
                        format!(
                            "values file '{}' for chart '{}' does not exist",
                            values_file.display(),
                            chart.name
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Whether the manifest declares nothing
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.charts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("manifest.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn validation_field(err: CoreError) -> (String, Option<usize>) {
        match err {
            CoreError::Validation { field, index, .. } => (field, index),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write_manifest(temp.path(), "images: []\ncharts: []\n");

        let err = Manifest::load(&path).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(validation_field(err).0, "manifest");
    }

    #[test]
    fn test_missing_sections_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write_manifest(temp.path(), "{}\n");
        assert!(Manifest::load(&path).unwrap_err().is_validation());
    }

    #[test]
    fn test_images_only_loads() {
        let temp = TempDir::new().unwrap();
        let path = write_manifest(temp.path(), "images:\n  - bitnami/nginx:1.25\n");

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.images, vec!["bitnami/nginx:1.25"]);
        assert!(manifest.charts.is_empty());
    }

    #[test]
    fn test_blank_image_reports_index() {
        let temp = TempDir::new().unwrap();
        let path = write_manifest(temp.path(), "images:\n  - nginx:1.25\n  - \"  \"\n");

        let err = Manifest::load(&path).unwrap_err();
        assert_eq!(validation_field(err), ("images".to_string(), Some(1)));
    }

    #[test]
    fn test_images_checked_before_charts() {
        let manifest = Manifest {
            images: vec!["".to_string()],
            charts: vec![ChartSpec {
                name: "".to_string(),
                repo: "https://example.com".to_string(),
                version: "1.0.0".to_string(),
                values_file: None,
            }],
        };

        let err = manifest.validate().unwrap_err();
        assert_eq!(validation_field(err).0, "images");
    }

    #[test]
    fn test_chart_field_checks() {
        let chart = |name: &str, repo: &str, version: &str| ChartSpec {
            name: name.to_string(),
            repo: repo.to_string(),
            version: version.to_string(),
            values_file: None,
        };

        let cases = [
            (chart("", "https://x", "1.0.0"), "charts.name"),
            (chart("nginx", " ", "1.0.0"), "charts.repo"),
            (chart("nginx", "https://x", ""), "charts.version"),
        ];

        for (spec, expected) in cases {
            let manifest = Manifest {
                images: vec![],
                charts: vec![spec],
            };
            let (field, index) = validation_field(manifest.validate().unwrap_err());
            assert_eq!(field, expected);
            assert_eq!(index, Some(0));
        }
    }

    #[test]
    fn test_missing_values_file() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest {
            images: vec![],
            charts: vec![ChartSpec {
                name: "nginx".to_string(),
                repo: "https://charts.example.com".to_string(),
                version: "15.0.0".to_string(),
                values_file: Some(temp.path().join("missing-values.yaml")),
            }],
        };

        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("missing-values.yaml"));
    }

    #[test]
    fn test_existing_values_file_and_camel_case() {
        let temp = TempDir::new().unwrap();
        let values = temp.path().join("values.yaml");
        std::fs::write(&values, "replicaCount: 2\n").unwrap();

        let yaml = format!(
            "charts:\n  - name: nginx\n    repo: https://charts.example.com\n    version: 15.0.0\n    valuesFile: {}\n",
            values.display()
        );
        let path = write_manifest(temp.path(), &yaml);

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.charts[0].values_file.as_deref(), Some(values.as_path()));
        assert_eq!(manifest.charts[0].archive_name(), "nginx-15.0.0.tgz");
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest {
            images: vec!["redis:7".to_string()],
            charts: vec![ChartSpec {
                name: "redis".to_string(),
                repo: "https://charts.example.com".to_string(),
                version: "17.0.0".to_string(),
                values_file: None,
            }],
        };

        let path = temp.path().join("out.yaml");
        manifest.save(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
    }
}
