//! Discover container images referenced by packaged charts

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::archive::read_files_matching;
use crate::error::{CoreError, Result};
use crate::manifest::Manifest;
use crate::naming::split_repository_tag;
use crate::values::ValueNode;

const REPOSITORY_FIELDS: [&str; 3] = ["repository", "image", "registry"];
const TAG_FIELDS: [&str; 2] = ["tag", "imageTag"];

static TEMPLATE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:image|Image):\s*["']?([^"'\s}]+):([^"'\s}]+)["']?"#)
        .expect("template image pattern is valid")
});

/// Where a reference was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    Values,
    Template,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSource::Values => write!(f, "values.yaml"),
            ReferenceSource::Template => write!(f, "template"),
        }
    }
}

/// An image reference found in a chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub chart: String,
    /// Dotted key path for values, template file name for templates
    pub path: String,
    pub repository: String,
    /// Empty when the chart does not pin a tag
    pub tag: String,
    pub source: ReferenceSource,
}

impl ImageReference {
    /// `repository[:tag]`
    pub fn full_image(&self) -> String {
        if self.tag.is_empty() {
            self.repository.clone()
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

/// References found in one chart archive
#[derive(Debug, Clone)]
pub struct ChartAnalysis {
    pub chart: String,
    pub archive: PathBuf,
    pub references: Vec<ImageReference>,
}

/// Walk a values tree for mappings that look like image settings
pub fn analyze_values(chart: &str, values: &ValueNode) -> Vec<ImageReference> {
    let mut references = Vec::new();
    collect_values(chart, values, "", &mut references);
    references
}

fn collect_values(chart: &str, node: &ValueNode, path: &str, out: &mut Vec<ImageReference>) {
    match node {
        ValueNode::Mapping(map) => {
            let repository = REPOSITORY_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(|v| v.as_non_empty_str()));

            if let Some(repository) = repository {
                let tag = TAG_FIELDS
                    .iter()
                    .find_map(|field| map.get(*field).and_then(|v| v.as_non_empty_str()))
                    .unwrap_or_default();

                out.push(ImageReference {
                    chart: chart.to_string(),
                    path: path.to_string(),
                    repository: repository.to_string(),
                    tag: tag.to_string(),
                    source: ReferenceSource::Values,
                });
            }

            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_values(chart, child, &child_path, out);
            }
        }
        ValueNode::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_values(chart, item, &format!("{}[{}]", path, i), out);
            }
        }
        ValueNode::Scalar(_) => {}
    }
}

/// Scan template text for `image: repo:tag` literals
pub fn analyze_template(chart: &str, template_name: &str, text: &str) -> Vec<ImageReference> {
    TEMPLATE_IMAGE
        .captures_iter(text)
        .map(|caps| ImageReference {
            chart: chart.to_string(),
            path: template_name.to_string(),
            repository: caps[1].to_string(),
            tag: caps[2].to_string(),
            source: ReferenceSource::Template,
        })
        .collect()
}

#[derive(Deserialize)]
struct ChartMetadata {
    name: String,
}

/// Analyze the top-level chart in a `.tgz` without extracting it
///
/// Subcharts under `charts/` are not visited.
pub fn analyze_chart_archive(chart_path: &Path) -> Result<ChartAnalysis> {
    let files = read_files_matching(chart_path, |path| {
        let mut parts = path.splitn(2, '/');
        let _root = parts.next();
        match parts.next() {
            Some("Chart.yaml") | Some("values.yaml") => true,
            Some(rest) => rest.starts_with("templates/"),
            None => false,
        }
    })?;

    let root = files
        .first()
        .and_then(|(path, _)| path.split('/').next())
        .map(str::to_string)
        .ok_or_else(|| CoreError::archive(chart_path.display(), "no chart found in the archive"))?;

    let mut chart = root.clone();
    let mut values = None;
    let mut templates = Vec::new();

    for (path, content) in &files {
        let Some(rel) = path.strip_prefix(&root).and_then(|p| p.strip_prefix('/')) else {
            continue;
        };
        match rel {
            "Chart.yaml" => {
                let metadata: ChartMetadata = serde_yaml::from_slice(content)?;
                chart = metadata.name;
            }
            "values.yaml" => {
                values = Some(ValueNode::from_yaml(&String::from_utf8_lossy(content))?);
            }
            _ => match std::str::from_utf8(content) {
                Ok(text) => templates.push((rel.to_string(), text.to_string())),
                Err(_) => tracing::debug!(template = rel, "skipping non-UTF-8 template"),
            },
        }
    }

    let mut references = Vec::new();
    if let Some(values) = &values {
        references.extend(analyze_values(&chart, values));
    }
    for (name, text) in &templates {
        references.extend(analyze_template(&chart, name, text));
    }

    Ok(ChartAnalysis {
        chart,
        archive: chart_path.to_path_buf(),
        references,
    })
}

/// Analyze every chart a manifest declares, looking them up in `charts_dir`
///
/// `<name>-<version>.tgz` is preferred; otherwise the first `<name>-*.tgz`.
pub fn analyze_manifest_charts(manifest: &Manifest, charts_dir: &Path) -> Result<Vec<ChartAnalysis>> {
    manifest
        .charts
        .iter()
        .map(|spec| {
            let exact = charts_dir.join(spec.archive_name());
            let archive = if exact.exists() {
                exact
            } else {
                find_by_prefix(charts_dir, &spec.name).ok_or_else(|| {
                    CoreError::archive(
                        charts_dir.display(),
                        format!("chart file not found for {}-{}", spec.name, spec.version),
                    )
                })?
            };
            analyze_chart_archive(&archive)
        })
        .collect()
}

fn find_by_prefix(dir: &Path, name: &str) -> Option<PathBuf> {
    let pattern = dir.join(format!("{}-*.tgz", glob::Pattern::escape(name)));
    glob::glob(&pattern.to_string_lossy())
        .ok()?
        .filter_map(|p| p.ok())
        .next()
}

/// Images charts reference that the manifest does not ship
///
/// A reference is covered when its `repository[:tag]` equals a manifest image
/// or its repository equals a manifest image's repository. Results are
/// deduplicated and keep discovery order.
pub fn find_images_not_in_manifest<'a, I>(references: I, manifest_images: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = &'a ImageReference>,
{
    let mut known: HashSet<&str> = HashSet::new();
    for image in manifest_images {
        known.insert(image.as_str());
        known.insert(split_repository_tag(image).0);
    }

    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for reference in references {
        let full = reference.full_image();
        if known.contains(full.as_str()) || known.contains(reference.repository.as_str()) {
            continue;
        }
        if seen.insert(full.clone()) {
            missing.push(full);
        }
    }
    missing
}
