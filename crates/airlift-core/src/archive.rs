//! Bundle archive creation and extraction
//!
//! Bundles are gzip-compressed tarballs. Packing walks a directory in file-name
//! order and stores every directory, regular file and symlink under its path
//! relative to the source root, with a zeroed mtime so identical trees produce
//! identical archives.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

/// Summary of an extraction
#[derive(Debug, Clone, Default)]
pub struct ReadReport {
    /// Number of entries materialized on disk
    pub extracted: usize,
    /// Entries skipped because their type is not supported
    pub skipped: Vec<String>,
}

/// Information about a file in an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Relative path within the archive
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Pack `source_dir` into a `.tar.gz` at `output`
pub fn write_archive(source_dir: &Path, output: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(CoreError::archive(
            source_dir.display(),
            "source is not a directory",
        ));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::archive(source_dir.display(), e.to_string()))?;
        let rel_path = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| CoreError::archive(entry.path().display(), e.to_string()))?;
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            let mut header = new_header(EntryType::Symlink, 0o777, 0);
            builder.append_link(&mut header, rel_path, &target)?;
        } else if file_type.is_dir() {
            let mut header = new_header(EntryType::Directory, 0o755, 0);
            builder.append_data(&mut header, rel_path, std::io::empty())?;
        } else if file_type.is_file() {
            let metadata = entry.metadata().map_err(|e| {
                CoreError::archive(entry.path().display(), e.to_string())
            })?;
            let mut header = new_header(EntryType::Regular, file_mode(&metadata), metadata.len());
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, rel_path, file)?;
        } else {
            tracing::warn!(path = %entry.path().display(), "skipping unsupported file type");
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.flush()?;

    Ok(())
}

/// Extract a `.tar.gz` into `dest`
///
/// Directories, regular files and symlinks are recreated; anything else is
/// skipped with a warning and extraction carries on.
pub fn read_archive(archive_path: &Path, dest: &Path) -> Result<ReadReport> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    std::fs::create_dir_all(dest)?;

    let mut report = ReadReport::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel_path = entry.path()?.into_owned();
        let target = safe_join(dest, &rel_path)?;
        reject_symlinked_parents(dest, &rel_path)?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                remove_symlink(&target)?;
                let mut out = File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;
                set_mode(&target, entry.header().mode().unwrap_or(0o644))?;
            }
            EntryType::Symlink => {
                let link = entry.link_name()?.ok_or_else(|| {
                    CoreError::archive(rel_path.display(), "symlink without target")
                })?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                create_symlink(&link, &target)?;
            }
            other => {
                tracing::warn!(
                    path = %rel_path.display(),
                    entry_type = ?other,
                    "skipping unsupported archive entry"
                );
                report.skipped.push(rel_path.to_string_lossy().to_string());
                continue;
            }
        }

        report.extracted += 1;
    }

    Ok(report)
}

/// List entries in an archive
pub fn list_archive(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        entries.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().to_string(),
            size: entry.header().size()?,
            is_dir: entry.header().entry_type().is_dir(),
        });
    }

    Ok(entries)
}

/// Read a single file from an archive without extracting it
pub fn read_file_from_archive(archive_path: &Path, file_path: &str) -> Result<Vec<u8>> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == file_path {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }

    Err(CoreError::archive(
        archive_path.display(),
        format!("file not found in archive: {}", file_path),
    ))
}

/// Read every regular file whose archive path satisfies `filter`
pub fn read_files_matching<F>(archive_path: &Path, filter: F) -> Result<Vec<(String, Vec<u8>)>>
where
    F: Fn(&str) -> bool,
{
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().to_string();
        if filter(&path) {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.push((path, content));
        }
    }

    Ok(files)
}

fn new_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header
}

/// Join an archive path onto `dest`, refusing absolute paths and `..`
fn safe_join(dest: &Path, rel: &Path) -> Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => {
                return Err(CoreError::archive(
                    rel.display(),
                    "entry escapes the destination directory",
                ));
            }
        }
    }
    Ok(target)
}

/// Refuse entries whose parent directories include a symlink written earlier
fn reject_symlinked_parents(dest: &Path, rel: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    let mut parts = rel
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .peekable();

    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        current.push(part);
        match current.symlink_metadata() {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(CoreError::archive(
                    rel.display(),
                    "entry escapes the destination directory through a symlink",
                ));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

/// A regular file entry replaces a symlink instead of writing through it
fn remove_symlink(path: &Path) -> Result<()> {
    if let Ok(metadata) = path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link: &Path, target: &Path) -> Result<()> {
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(link: &Path, target: &Path) -> Result<()> {
    tracing::warn!(
        link = %link.display(),
        path = %target.display(),
        "symlinks are not supported on this platform"
    );
    Ok(())
}
