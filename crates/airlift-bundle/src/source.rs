//! Where `push` reads artifacts from

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use airlift_core::read_archive;

use crate::error::{BundleError, Result};

pub const IMAGES_DIR: &str = "images";
pub const CHARTS_DIR: &str = "charts";

/// A bundle file or an already unpacked directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Bundle archive, extracted to a temporary directory when opened
    Bundle(PathBuf),
    /// Unpacked bundle, or a bare directory of image or chart archives
    Directory(PathBuf),
}

impl ArtifactSource {
    /// Classify an existing path
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_dir() {
            Ok(ArtifactSource::Directory(path.to_path_buf()))
        } else if path.is_file() {
            Ok(ArtifactSource::Bundle(path.to_path_buf()))
        } else {
            Err(BundleError::SourceNotFound {
                path: path.display().to_string(),
            })
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ArtifactSource::Bundle(p) | ArtifactSource::Directory(p) => p,
        }
    }

    /// Make the artifacts available on disk
    pub fn open(&self) -> Result<OpenedSource> {
        let path = self.path();
        if !path.exists() {
            return Err(BundleError::SourceNotFound {
                path: path.display().to_string(),
            });
        }

        match self {
            ArtifactSource::Directory(dir) => Ok(OpenedSource {
                root: dir.clone(),
                _extracted: None,
            }),
            ArtifactSource::Bundle(bundle) => {
                let temp = tempfile::Builder::new()
                    .prefix("airlift-bundle-")
                    .tempdir()?;
                tracing::info!(bundle = %bundle.display(), "extracting bundle");
                let report = read_archive(bundle, temp.path())?;
                tracing::debug!(entries = report.extracted, "bundle extracted");
                Ok(OpenedSource {
                    root: temp.path().to_path_buf(),
                    _extracted: Some(temp),
                })
            }
        }
    }
}

/// Artifacts on disk; an extracted bundle is removed when this is dropped
#[derive(Debug)]
pub struct OpenedSource {
    root: PathBuf,
    _extracted: Option<TempDir>,
}

impl OpenedSource {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `images/` if present, otherwise the root itself
    pub fn images_dir(&self) -> PathBuf {
        self.subdir_or_root(IMAGES_DIR)
    }

    /// `charts/` if present, otherwise the root itself
    pub fn charts_dir(&self) -> PathBuf {
        self.subdir_or_root(CHARTS_DIR)
    }

    fn subdir_or_root(&self, name: &str) -> PathBuf {
        let dir = self.root.join(name);
        if dir.is_dir() { dir } else { self.root.clone() }
    }

    /// `*.tar` files of the images directory, sorted by name
    pub fn image_archives(&self) -> Result<Vec<PathBuf>> {
        list_matching(&self.images_dir(), "*.tar")
    }

    /// `*.tgz` files of the charts directory, sorted by name
    pub fn chart_archives(&self) -> Result<Vec<PathBuf>> {
        list_matching(&self.charts_dir(), "*.tgz")
    }
}

pub(crate) fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(pattern);
    let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
        BundleError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })?;
    let mut found: Vec<PathBuf> = paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect();
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::write_archive;

    fn bundle_tree(root: &Path) {
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::create_dir_all(root.join("charts")).unwrap();
        std::fs::write(root.join("manifest.yaml"), "images: [nginx:1.25]\n").unwrap();
        std::fs::write(root.join("images/nginx_1.25.tar"), b"image").unwrap();
        std::fs::write(root.join("images/redis_7.tar"), b"image").unwrap();
        std::fs::write(root.join("charts/nginx-15.0.0.tgz"), b"chart").unwrap();
        std::fs::write(root.join("charts/values-prod.yaml"), b"a: 1").unwrap();
    }

    #[test]
    fn test_directory_source() {
        let temp = TempDir::new().unwrap();
        bundle_tree(temp.path());

        let source = ArtifactSource::from_path(temp.path()).unwrap();
        assert!(matches!(source, ArtifactSource::Directory(_)));

        let opened = source.open().unwrap();
        let images = opened.image_archives().unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("images/nginx_1.25.tar"));
        assert_eq!(opened.chart_archives().unwrap().len(), 1);
    }

    #[test]
    fn test_bare_directory_falls_back_to_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app_v1.tar"), b"image").unwrap();

        let opened = ArtifactSource::Directory(temp.path().to_path_buf()).open().unwrap();
        assert_eq!(opened.images_dir(), temp.path());
        assert_eq!(opened.image_archives().unwrap().len(), 1);
        assert!(opened.chart_archives().unwrap().is_empty());
    }

    #[test]
    fn test_bundle_is_extracted_and_cleaned_up() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        bundle_tree(&tree);
        let bundle = temp.path().join("bundle.tar.gz");
        write_archive(&tree, &bundle).unwrap();

        let opened = ArtifactSource::from_path(&bundle).unwrap().open().unwrap();
        let root = opened.root().to_path_buf();
        assert_eq!(opened.image_archives().unwrap().len(), 2);
        assert!(root.join("manifest.yaml").exists());

        drop(opened);
        assert!(!root.exists());
    }

    #[test]
    fn test_missing_source() {
        let err = ArtifactSource::from_path(Path::new("/nonexistent/bundle.tar.gz")).unwrap_err();
        assert!(matches!(err, BundleError::SourceNotFound { .. }));
    }
}
