//! Airlift Core - manifests, bundle archives and chart image rewriting
//!
//! This crate holds everything that works on local files only:
//! - `Manifest`: the declared images and charts of a bundle
//! - `archive`: deterministic tar+gzip packing and unpacking
//! - `naming`: file names of image archives inside a bundle
//! - `ValueNode`: decoded chart values
//! - `rewrite` / `analyze`: image references inside packaged charts
//! - `ProgressReporter`: per-artifact progress sink

pub mod analyze;
pub mod archive;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod progress;
pub mod rewrite;
pub mod values;

pub use analyze::{
    ChartAnalysis, ImageReference, ReferenceSource, analyze_chart_archive,
    analyze_manifest_charts, find_images_not_in_manifest,
};
pub use archive::{ArchiveEntry, ReadReport, list_archive, read_archive, write_archive};
pub use error::{CoreError, Result};
pub use manifest::{ChartSpec, Manifest};
pub use progress::{ArtifactStatus, NoopProgress, ProgressReporter, RecordingProgress, TerminalProgress};
pub use rewrite::{RewriteOptions, rewrite_chart_archive, rewrite_values};
pub use values::{Scalar, ValueNode};
