//! Image tarballs in `docker save` layout
//!
//! ```text
//! manifest.json          [{"Config": "<hex>.json", "RepoTags": [...], "Layers": [...]}]
//! <config-hex>.json      image config blob
//! <layer-hex>.tar.gz     one file per layer, stored as pulled
//! oci-manifest.json      registry manifest the blobs came from
//! ```
//!
//! `docker load` accepts the archive as is. The extra `oci-manifest.json` keeps
//! the original media types so a registry push can reproduce the same digests.

use oci_distribution::manifest::OciImageManifest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder, Header};

use crate::error::{RepoError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const OCI_MANIFEST_FILE: &str = "oci-manifest.json";

pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// One entry of `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveManifestEntry {
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    pub layers: Vec<String>,
}

/// A blob plus the media type it should be pushed with
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Vec<u8>,
    pub media_type: String,
}

/// Image content ready to push
#[derive(Debug, Clone)]
pub struct ImageContent {
    pub repo_tags: Vec<String>,
    pub config: Blob,
    pub layers: Vec<Blob>,
    /// Registry manifest, when the archive was produced by a registry pull
    pub manifest: Option<OciImageManifest>,
}

fn hex_of(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}

fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

fn append_file(builder: &mut Builder<File>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

/// Write pulled blobs as a docker archive, returning the archive size in bytes
pub fn write_docker_archive(
    dest: &Path,
    repo_tags: &[String],
    manifest: &OciImageManifest,
    config: &[u8],
    layers: &[Vec<u8>],
) -> Result<u64> {
    if manifest.layers.len() != layers.len() {
        return Err(RepoError::InvalidImageArchive {
            path: dest.display().to_string(),
            message: format!(
                "manifest lists {} layers, got {}",
                manifest.layers.len(),
                layers.len()
            ),
        });
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut builder = Builder::new(File::create(dest)?);

    let config_name = format!("{}.json", hex_of(&manifest.config.digest));
    append_file(&mut builder, &config_name, config)?;

    let mut layer_names = Vec::with_capacity(layers.len());
    for (descriptor, data) in manifest.layers.iter().zip(layers) {
        let ext = if is_gzip(data) { "tar.gz" } else { "tar" };
        let name = format!("{}.{}", hex_of(&descriptor.digest), ext);
        append_file(&mut builder, &name, data)?;
        layer_names.push(name);
    }

    let entries = vec![ArchiveManifestEntry {
        config: config_name,
        repo_tags: Some(repo_tags.to_vec()),
        layers: layer_names,
    }];
    append_file(&mut builder, MANIFEST_FILE, &serde_json::to_vec(&entries)?)?;
    append_file(&mut builder, OCI_MANIFEST_FILE, &serde_json::to_vec(manifest)?)?;

    builder.into_inner()?.sync_all()?;
    Ok(std::fs::metadata(dest)?.len())
}

/// Read a docker archive, from this crate or from `docker save`
pub fn read_docker_archive(path: &Path) -> Result<ImageContent> {
    let invalid = |message: String| RepoError::InvalidImageArchive {
        path: path.display().to_string(),
        message,
    };

    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    let mut archive = Archive::new(File::open(path)?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.insert(name, data);
    }

    let manifest_json = files
        .get(MANIFEST_FILE)
        .ok_or_else(|| invalid(format!("{} is missing", MANIFEST_FILE)))?;
    let entries: Vec<ArchiveManifestEntry> = serde_json::from_slice(manifest_json)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| invalid(format!("{} has no images", MANIFEST_FILE)))?;

    let mut take = |name: &str| {
        files
            .remove(name)
            .ok_or_else(|| invalid(format!("{} is missing", name)))
    };

    let oci_manifest: Option<OciImageManifest> = match take(OCI_MANIFEST_FILE) {
        Ok(data) => Some(serde_json::from_slice(&data)?),
        Err(_) => None,
    };
    let oci_manifest = oci_manifest.filter(|m| m.layers.len() == entry.layers.len());

    let config = Blob {
        data: take(&entry.config)?,
        media_type: oci_manifest
            .as_ref()
            .map(|m| m.config.media_type.clone())
            .unwrap_or_else(|| OCI_CONFIG_MEDIA_TYPE.to_string()),
    };

    let mut layers = Vec::with_capacity(entry.layers.len());
    for (i, name) in entry.layers.iter().enumerate() {
        let data = take(name)?;
        let media_type = match &oci_manifest {
            Some(m) => m.layers[i].media_type.clone(),
            None if is_gzip(&data) => OCI_LAYER_GZIP_MEDIA_TYPE.to_string(),
            None => OCI_LAYER_MEDIA_TYPE.to_string(),
        };
        layers.push(Blob { data, media_type });
    }

    Ok(ImageContent {
        repo_tags: entry.repo_tags.unwrap_or_default(),
        config,
        layers,
        manifest: oci_manifest,
    })
}
