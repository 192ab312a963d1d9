//! Reachable addresses of the in-cluster registry and chart repository

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{CommandRunner, CommandSpec, TunnelGuard};
use crate::error::{BundleError, Result};

/// An address to talk to, plus the tunnel keeping it reachable
#[derive(Debug)]
pub struct Endpoint {
    pub address: String,
    /// Dropping the endpoint closes the tunnel
    pub tunnel: Option<TunnelGuard>,
}

impl Endpoint {
    pub fn direct(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tunnel: None,
        }
    }
}

/// Supplies push targets
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    /// Registry host (and port) images are pushed to
    async fn registry_endpoint(&self) -> Result<Endpoint>;

    /// Base URL of the chart repository
    async fn chart_repository_endpoint(&self) -> Result<Endpoint>;
}

/// Fixed addresses
#[derive(Debug, Clone, Default)]
pub struct StaticEndpoints {
    pub registry: Option<String>,
    pub chart_repository: Option<String>,
}

impl StaticEndpoints {
    pub fn new(registry: Option<String>, chart_repository: Option<String>) -> Self {
        Self {
            registry,
            chart_repository,
        }
    }
}

#[async_trait]
impl EndpointProvider for StaticEndpoints {
    async fn registry_endpoint(&self) -> Result<Endpoint> {
        self.registry
            .as_deref()
            .map(Endpoint::direct)
            .ok_or_else(|| BundleError::endpoint("no registry configured"))
    }

    async fn chart_repository_endpoint(&self) -> Result<Endpoint> {
        self.chart_repository
            .as_deref()
            .map(Endpoint::direct)
            .ok_or_else(|| BundleError::endpoint("no chart repository configured"))
    }
}

/// A cluster service and the port it listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub service: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            port,
        }
    }
}

/// Reaches cluster services through `kubectl port-forward`
pub struct PortForwardEndpoints {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    kubeconfig: Option<PathBuf>,
    registry: ServicePort,
    chart_repository: ServicePort,
    settle: Duration,
}

impl PortForwardEndpoints {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            namespace: namespace.into(),
            kubeconfig: None,
            registry: ServicePort::new("registry", 5000),
            chart_repository: ServicePort::new("chartmuseum", 8080),
            settle: Duration::from_secs(2),
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn with_services(mut self, registry: ServicePort, chart_repository: ServicePort) -> Self {
        self.registry = registry;
        self.chart_repository = chart_repository;
        self
    }

    /// How long to wait for a fresh tunnel before using it
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn command(&self, target: &ServicePort) -> CommandSpec {
        let mut args = vec![
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            format!("svc/{}", target.service),
            format!("{}:{}", target.port, target.port),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        CommandSpec::new("kubectl", args)
    }

    async fn forward(&self, target: &ServicePort) -> Result<TunnelGuard> {
        if !self.runner.is_available("kubectl") {
            return Err(BundleError::endpoint("kubectl not found"));
        }
        tracing::info!(
            service = %target.service,
            namespace = %self.namespace,
            port = target.port,
            "starting port-forward"
        );
        let guard = self.runner.spawn(&self.command(target)).await.map_err(|e| {
            BundleError::endpoint(format!("port-forward to svc/{} failed: {}", target.service, e))
        })?;
        tokio::time::sleep(self.settle).await;
        Ok(guard)
    }
}

#[async_trait]
impl EndpointProvider for PortForwardEndpoints {
    async fn registry_endpoint(&self) -> Result<Endpoint> {
        let tunnel = self.forward(&self.registry).await?;
        Ok(Endpoint {
            address: format!("localhost:{}", self.registry.port),
            tunnel: Some(tunnel),
        })
    }

    async fn chart_repository_endpoint(&self) -> Result<Endpoint> {
        let tunnel = self.forward(&self.chart_repository).await?;
        Ok(Endpoint {
            address: format!("http://localhost:{}", self.chart_repository.port),
            tunnel: Some(tunnel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedRunner;

    #[tokio::test]
    async fn test_static_endpoints() {
        let endpoints = StaticEndpoints::new(Some("registry.local:5000".to_string()), None);
        assert_eq!(endpoints.registry_endpoint().await.unwrap().address, "registry.local:5000");
        assert!(matches!(
            endpoints.chart_repository_endpoint().await,
            Err(BundleError::Endpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_port_forward_commands() {
        let runner = ScriptedRunner::new().with_program("kubectl");
        let endpoints = PortForwardEndpoints::new(Arc::new(runner.clone()), "airlift-registry")
            .with_kubeconfig(Some(PathBuf::from("/tmp/kubeconfig")))
            .with_settle_time(Duration::ZERO);

        let registry = endpoints.registry_endpoint().await.unwrap();
        let charts = endpoints.chart_repository_endpoint().await.unwrap();

        assert_eq!(registry.address, "localhost:5000");
        assert_eq!(charts.address, "http://localhost:8080");
        assert!(registry.tunnel.is_some());
        assert_eq!(
            runner.command_lines(),
            vec![
                "kubectl port-forward -n airlift-registry svc/registry 5000:5000 --kubeconfig /tmp/kubeconfig",
                "kubectl port-forward -n airlift-registry svc/chartmuseum 8080:8080 --kubeconfig /tmp/kubeconfig",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_kubectl_is_unreachable() {
        let endpoints = PortForwardEndpoints::new(Arc::new(ScriptedRunner::new()), "default");
        let err = endpoints.registry_endpoint().await.unwrap_err();
        assert!(err.to_string().contains("kubectl not found"));
    }
}
