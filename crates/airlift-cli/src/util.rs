//! Shared utility functions for CLI commands

/// Format a byte size as a human-readable string
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// First `len` hex characters of a digest, without its algorithm prefix
///
/// Works on char boundaries, so short or odd input never panics.
#[must_use]
pub fn short_digest(digest: &str, len: usize) -> &str {
    let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
    match hex.char_indices().nth(len) {
        Some((end, _)) => &hex[..end],
        None => hex,
    }
}
