//! Chart installation through the Helm CLI

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use airlift_core::ValueNode;

use crate::engine::{CommandRunner, CommandSpec};
use crate::error::{BundleError, Result};

/// Installs a chart into a cluster
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    async fn install(
        &self,
        chart: &Path,
        release: &str,
        namespace: &str,
        values: &ValueNode,
    ) -> Result<()>;
}

/// Runs `helm upgrade --install`
pub struct HelmCliInstaller {
    runner: Arc<dyn CommandRunner>,
    program: String,
    kubeconfig: Option<PathBuf>,
    timeout: String,
}

impl HelmCliInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "helm".to_string(),
            kubeconfig: None,
            timeout: "300s".to_string(),
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    fn command(&self, chart: &Path, release: &str, namespace: &str, values_file: &Path) -> CommandSpec {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.to_string(),
            chart.display().to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--create-namespace".to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            self.timeout.clone(),
            "-f".to_string(),
            values_file.display().to_string(),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        CommandSpec::new(&self.program, args)
    }
}

#[async_trait]
impl ChartInstaller for HelmCliInstaller {
    async fn install(
        &self,
        chart: &Path,
        release: &str,
        namespace: &str,
        values: &ValueNode,
    ) -> Result<()> {
        let install_err = |message: String| BundleError::Install {
            release: release.to_string(),
            message,
        };

        if !self.runner.is_available(&self.program) {
            return Err(install_err(format!("{} not found", self.program)));
        }

        let values_file = tempfile::Builder::new()
            .prefix("airlift-values-")
            .suffix(".yaml")
            .tempfile()?;
        std::fs::write(values_file.path(), values.to_yaml()?)?;

        let output = self
            .runner
            .run(&self.command(chart, release, namespace, values_file.path()))
            .await?;
        if !output.success() {
            return Err(install_err(output.stderr.trim().to_string()));
        }

        tracing::info!(release, namespace, "release installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CommandOutput, ScriptedRunner};

    #[tokio::test]
    async fn test_helm_command() {
        let runner = ScriptedRunner::new().with_program("helm");
        let installer = HelmCliInstaller::new(Arc::new(runner.clone()));
        let values = ValueNode::from_yaml("image:\n  repository: localhost:5000/nginx\n").unwrap();

        installer
            .install(Path::new("charts/nginx-15.0.0.tgz"), "web", "apps", &values)
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert_eq!(call.program, "helm");
        assert_eq!(
            &call.args[..6],
            ["upgrade", "--install", "web", "charts/nginx-15.0.0.tgz", "--namespace", "apps"]
        );
        assert!(call.args.contains(&"--create-namespace".to_string()));
        assert!(call.args.contains(&"-f".to_string()));
    }

    #[tokio::test]
    async fn test_helm_failure() {
        let runner = ScriptedRunner::new()
            .with_program("helm")
            .respond("helm upgrade", CommandOutput::failed(1, "Error: cluster unreachable\n"));
        let installer = HelmCliInstaller::new(Arc::new(runner));

        let err = installer
            .install(Path::new("chart"), "web", "default", &ValueNode::from_yaml("").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to install release web: Error: cluster unreachable");
    }

    #[tokio::test]
    async fn test_missing_helm() {
        let installer = HelmCliInstaller::new(Arc::new(ScriptedRunner::new()));
        let err = installer
            .install(Path::new("chart"), "web", "default", &ValueNode::from_yaml("").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Install { .. }));
    }
}
