//! Unpack command - extract a bundle

use console::style;
use std::path::Path;

use airlift_bundle::{bundled_manifest, unpack};

use crate::error::Result;

pub fn run(bundle: &Path, output: &Path) -> Result<()> {
    println!(
        "{} {} -> {}",
        style("Unpacking").cyan().bold(),
        bundle.display(),
        output.display()
    );

    let report = unpack(bundle, output)?;
    println!("  {} {} entries", style("Extracted").green().bold(), report.extracted);

    for entry in &report.skipped {
        println!(
            "  {} skipped unsupported entry {}",
            style("Warning:").yellow().bold(),
            entry
        );
    }

    if let Some(manifest) = bundled_manifest(output)? {
        println!(
            "  {} {} image(s), {} chart(s)",
            style("Manifest").dim(),
            manifest.images.len(),
            manifest.charts.len()
        );
    }

    Ok(())
}
