//! Analyze command - find chart images the manifest does not ship

use console::style;
use std::path::Path;

use airlift_bundle::bundled_manifest;
use airlift_bundle::source::CHARTS_DIR;
use airlift_core::{analyze_manifest_charts, find_images_not_in_manifest};

use crate::error::{CliError, Result};

pub fn run(dir: &Path) -> Result<()> {
    let manifest = bundled_manifest(dir)?.ok_or_else(|| {
        CliError::validation_with_help(
            format!("no manifest.yaml in {}", dir.display()),
            "Point analyze at an unpacked bundle directory",
        )
    })?;

    let analyses = analyze_manifest_charts(&manifest, &dir.join(CHARTS_DIR))?;

    for analysis in &analyses {
        println!("{} {}", style("Chart").cyan().bold(), analysis.chart);
        if analysis.references.is_empty() {
            println!("  {}", style("no image references").dim());
        }
        for reference in &analysis.references {
            println!(
                "  {} {}",
                reference.full_image(),
                style(format!("({}: {})", reference.source, reference.path)).dim()
            );
        }
    }

    let missing = find_images_not_in_manifest(
        analyses.iter().flat_map(|a| a.references.iter()),
        &manifest.images,
    );

    println!();
    if missing.is_empty() {
        println!(
            "{} every referenced image is in the manifest",
            style("✓").green().bold()
        );
    } else {
        println!(
            "{} {} image(s) referenced by charts are not in the manifest:",
            style("Warning:").yellow().bold(),
            missing.len()
        );
        for image in &missing {
            println!("  - {}", image);
        }
    }

    Ok(())
}
