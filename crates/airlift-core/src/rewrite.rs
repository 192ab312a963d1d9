//! Point image references in chart values at a private registry

use std::path::Path;

use crate::archive::{read_archive, write_archive};
use crate::error::{CoreError, Result};
use crate::values::ValueNode;

/// Options for the chart rewrite pass of a build
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Registry host (and optional port) the charts should pull from.
    /// `None` disables the pass.
    pub target_registry: Option<String>,
    /// Fail the build when a chart cannot be rewritten
    pub strict: bool,
}

/// Rewrite image references in a values tree, returning how many fields changed
///
/// Each mapping is handled as follows:
/// - `registry` + non-empty `repository`: the registry becomes `target` and the
///   repository is reduced to its last path segment; no other field of that
///   mapping is touched.
/// - otherwise a non-empty string `repository` or `image` that does not
///   already start with `target` becomes `<target>/<last segment>`.
///
/// Nested mappings, including those inside sequences, are visited after their
/// parent. Applying the rewrite twice gives the same tree as applying it once.
pub fn rewrite_values(node: &mut ValueNode, target: &str) -> usize {
    match node {
        ValueNode::Mapping(map) => {
            let mut changed = 0;

            let combined = map.get("registry").is_some_and(|r| r.as_str().is_some())
                && map
                    .get("repository")
                    .is_some_and(|r| r.as_non_empty_str().is_some());

            if combined {
                if map.get("registry").and_then(|r| r.as_str()) != Some(target) {
                    map.insert("registry".to_string(), ValueNode::string(target));
                    changed += 1;
                }
                let short = map
                    .get("repository")
                    .and_then(|r| r.as_str())
                    .and_then(|repo| repo.rsplit_once('/'))
                    .map(|(_, name)| name.to_string());
                if let Some(name) = short {
                    map.insert("repository".to_string(), ValueNode::string(name));
                    changed += 1;
                }
            } else {
                for field in ["repository", "image"] {
                    let rewritten = map
                        .get(field)
                        .and_then(|v| v.as_non_empty_str())
                        .filter(|value| !value.starts_with(target))
                        .map(|value| format!("{}/{}", target, last_segment(value)));
                    if let Some(value) = rewritten {
                        map.insert(field.to_string(), ValueNode::string(value));
                        changed += 1;
                    }
                }
            }

            for child in map.values_mut() {
                changed += rewrite_values(child, target);
            }
            changed
        }
        ValueNode::Sequence(items) => items
            .iter_mut()
            .map(|item| rewrite_values(item, target))
            .sum(),
        ValueNode::Scalar(_) => 0,
    }
}

fn last_segment(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Rewrite the top-level `values.yaml` of a packaged chart in place
///
/// The chart is extracted into a temporary directory, rewritten, packed again
/// next to the original and renamed over it, so a failure leaves the original
/// archive untouched. Returns the number of changed fields.
pub fn rewrite_chart_archive(chart_path: &Path, target: &str) -> Result<usize> {
    let chart_name = chart_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| chart_path.display().to_string());

    let temp = tempfile::tempdir()?;
    read_archive(chart_path, temp.path())
        .map_err(|e| CoreError::rewrite(&chart_name, format!("failed to extract: {}", e)))?;

    let chart_dir = single_chart_dir(temp.path())
        .ok_or_else(|| CoreError::rewrite(&chart_name, "no chart found in the archive"))?;

    let values_path = chart_dir.join("values.yaml");
    let mut values = ValueNode::from_file(&values_path).map_err(|e| {
        CoreError::rewrite(&chart_name, format!("failed to read values.yaml: {}", e))
    })?;

    let changed = rewrite_values(&mut values, target);
    if changed == 0 {
        tracing::debug!(chart = %chart_name, "no image references to rewrite");
        return Ok(0);
    }

    std::fs::write(&values_path, values.to_yaml()?)?;

    let parent = chart_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".rewrite-")
        .suffix(".tgz")
        .tempfile_in(parent)?;

    write_archive(temp.path(), staged.path())
        .map_err(|e| CoreError::rewrite(&chart_name, format!("failed to repack: {}", e)))?;
    staged
        .persist(chart_path)
        .map_err(|e| CoreError::rewrite(&chart_name, format!("failed to replace chart: {}", e)))?;

    tracing::debug!(chart = %chart_name, changed, "rewrote image references");
    Ok(changed)
}

/// The single top-level directory of an extracted chart
fn single_chart_dir(root: &Path) -> Option<std::path::PathBuf> {
    let mut dirs: Vec<_> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_file_from_archive;
    use tempfile::TempDir;

    const TARGET: &str = "registry.local:5000";

    fn tree(yaml: &str) -> ValueNode {
        ValueNode::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_registry_and_repository() {
        let mut values = tree("registry: docker.io\nrepository: bitnami/nginx\ntag: '1.25'\n");
        rewrite_values(&mut values, TARGET);

        assert_eq!(
            values,
            tree("registry: registry.local:5000\nrepository: nginx\ntag: '1.25'\n")
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut values = tree(
            r#"
image:
  registry: docker.io
  repository: bitnami/nginx
metrics:
  image: prom/exporter
sidecars:
  - repository: quay.io/jetstack/cert-manager
"#,
        );
        assert!(rewrite_values(&mut values, TARGET) > 0);
        let once = values.clone();

        assert_eq!(rewrite_values(&mut values, TARGET), 0);
        assert_eq!(values, once);
    }

    #[test]
    fn test_standalone_fields() {
        let mut values = tree("repository: quay.io/jetstack/cert-manager\nimage: busybox\n");
        rewrite_values(&mut values, TARGET);

        assert_eq!(
            values.get_path("repository").and_then(|v| v.as_str()),
            Some("registry.local:5000/cert-manager")
        );
        assert_eq!(
            values.get_path("image").and_then(|v| v.as_str()),
            Some("registry.local:5000/busybox")
        );
    }

    #[test]
    fn test_already_targeted_is_kept() {
        let mut values = tree("image: registry.local:5000/team/app\n");
        assert_eq!(rewrite_values(&mut values, TARGET), 0);
        assert_eq!(
            values.get_path("image").and_then(|v| v.as_str()),
            Some("registry.local:5000/team/app")
        );
    }

    #[test]
    fn test_combined_form_skips_image_field() {
        let mut values = tree("registry: docker.io\nrepository: nginx\nimage: other/thing\n");
        rewrite_values(&mut values, TARGET);
        assert_eq!(
            values.get_path("image").and_then(|v| v.as_str()),
            Some("other/thing")
        );
    }

    #[test]
    fn test_nested_and_sequences() {
        let mut values = tree(
            r#"
app:
  image:
    repository: bitnami/redis
    tag: "7"
  initContainers:
    - name: init
      image: library/busybox
"#,
        );
        rewrite_values(&mut values, TARGET);

        assert_eq!(
            values
                .get_path("app.image.repository")
                .and_then(|v| v.as_str()),
            Some("registry.local:5000/redis")
        );
        let init = match values.get_path("app.initContainers") {
            Some(ValueNode::Sequence(items)) => items[0].clone(),
            other => panic!("expected sequence, got {other:?}"),
        };
        assert_eq!(
            init.get_path("image").and_then(|v| v.as_str()),
            Some("registry.local:5000/busybox")
        );
    }

    #[test]
    fn test_non_string_and_empty_values_ignored() {
        let mut values = tree("image:\n  pullPolicy: Always\nrepository: ''\nregistry: ~\n");
        let before = values.clone();
        assert_eq!(rewrite_values(&mut values, TARGET), 0);
        assert_eq!(values, before);
    }

    fn packaged_chart(dir: &Path, values: &str) -> std::path::PathBuf {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("nginx/templates")).unwrap();
        std::fs::write(src.join("nginx/Chart.yaml"), "name: nginx\nversion: 15.0.0\n").unwrap();
        std::fs::write(src.join("nginx/values.yaml"), values).unwrap();
        std::fs::write(src.join("nginx/templates/deploy.yaml"), "kind: Deployment\n").unwrap();

        let chart = dir.join("nginx-15.0.0.tgz");
        write_archive(&src, &chart).unwrap();
        chart
    }

    #[test]
    fn test_rewrite_chart_archive() {
        let temp = TempDir::new().unwrap();
        let chart = packaged_chart(
            temp.path(),
            "image:\n  registry: docker.io\n  repository: bitnami/nginx\n  tag: '1.25'\n",
        );

        let changed = rewrite_chart_archive(&chart, TARGET).unwrap();
        assert_eq!(changed, 2);

        let values = read_file_from_archive(&chart, "nginx/values.yaml").unwrap();
        let values = ValueNode::from_yaml(&String::from_utf8(values).unwrap()).unwrap();
        assert_eq!(
            values.get_path("image.registry").and_then(|v| v.as_str()),
            Some(TARGET)
        );
        assert_eq!(
            values.get_path("image.repository").and_then(|v| v.as_str()),
            Some("nginx")
        );

        let template = read_file_from_archive(&chart, "nginx/templates/deploy.yaml").unwrap();
        assert_eq!(template, b"kind: Deployment\n");

        assert_eq!(rewrite_chart_archive(&chart, TARGET).unwrap(), 0);
    }

    #[test]
    fn test_rewrite_chart_without_values_fails() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("empty")).unwrap();
        let chart = temp.path().join("empty-1.0.0.tgz");
        write_archive(&src, &chart).unwrap();

        let err = rewrite_chart_archive(&chart, TARGET).unwrap_err();
        assert!(matches!(err, CoreError::Rewrite { .. }));
        assert!(chart.exists());
    }
}
