//! File names for image archives inside a bundle
//!
//! An image reference is flattened by replacing `/`, `:` and `@` with `_`.
//! Decoding splits at the last underscore: everything before it is the
//! repository (remaining underscores become `/`), everything after it is the
//! tag. Repositories whose path segments contain an underscore therefore do not
//! round-trip, e.g. `my_repo/name:tag` decodes to `my/repo/name:tag`.

/// File extension of image archives
pub const IMAGE_ARCHIVE_EXT: &str = "tar";

/// Flatten an image reference into a file-name-safe stem
pub fn encode_image_ref(reference: &str) -> String {
    reference.replace(['/', ':', '@'], "_")
}

/// `<encoded>.tar`
pub fn image_archive_name(reference: &str) -> String {
    format!("{}.{}", encode_image_ref(reference), IMAGE_ARCHIVE_EXT)
}

/// Recover `repository:tag` from an encoded stem
///
/// A stem without underscores is returned unchanged (no tag).
pub fn decode_image_ref(encoded: &str) -> String {
    match encoded.rsplit_once('_') {
        Some((repository, tag)) => format!("{}:{}", repository.replace('_', "/"), tag),
        None => encoded.to_string(),
    }
}

/// Decode an image archive file name, stripping the `.tar` extension
pub fn image_ref_from_archive_name(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".tar").unwrap_or(file_name);
    decode_image_ref(stem)
}

/// Split `repository[:tag]` at the last colon that belongs to the tag
///
/// A colon followed by a `/` later on is a registry port, not a tag.
pub fn split_repository_tag(reference: &str) -> (&str, Option<&str>) {
    let reference = reference.split('@').next().unwrap_or(reference);
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (reference, None),
    }
}
