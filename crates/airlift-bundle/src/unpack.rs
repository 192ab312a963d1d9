//! Extract a bundle

use std::path::Path;

use airlift_core::{Manifest, ReadReport, read_archive};

use crate::build::MANIFEST_FILE;
use crate::error::{BundleError, Result};

/// Extract `bundle` into `out_dir`, creating it if needed
pub fn unpack(bundle: &Path, out_dir: &Path) -> Result<ReadReport> {
    if !bundle.is_file() {
        return Err(BundleError::SourceNotFound {
            path: bundle.display().to_string(),
        });
    }

    std::fs::create_dir_all(out_dir)?;
    let report = read_archive(bundle, out_dir)?;
    tracing::info!(
        bundle = %bundle.display(),
        out_dir = %out_dir.display(),
        entries = report.extracted,
        "bundle unpacked"
    );
    Ok(report)
}

/// The manifest shipped inside an unpacked bundle, if any
///
/// Not validated: its values file paths point at the build host.
pub fn bundled_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(Some(Manifest::parse(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlift_core::write_archive;
    use tempfile::TempDir;

    #[test]
    fn test_unpack_round_trip() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        std::fs::create_dir_all(tree.join("images")).unwrap();
        std::fs::write(tree.join("images/nginx_1.25.tar"), b"image").unwrap();
        std::fs::write(tree.join(MANIFEST_FILE), "images:\n  - nginx:1.25\n").unwrap();
        let bundle = temp.path().join("bundle.tar.gz");
        write_archive(&tree, &bundle).unwrap();

        let out = temp.path().join("out");
        let report = unpack(&bundle, &out).unwrap();

        assert_eq!(report.extracted, 3);
        assert!(report.skipped.is_empty());
        assert_eq!(std::fs::read(out.join("images/nginx_1.25.tar")).unwrap(), b"image");
        let manifest = bundled_manifest(&out).unwrap().unwrap();
        assert_eq!(manifest.images, vec!["nginx:1.25"]);
    }

    #[test]
    fn test_unpack_missing_bundle() {
        let temp = TempDir::new().unwrap();
        let err = unpack(&temp.path().join("nope.tar.gz"), temp.path()).unwrap_err();
        assert!(matches!(err, BundleError::SourceNotFound { .. }));
        assert!(bundled_manifest(temp.path()).unwrap().is_none());
    }
}
