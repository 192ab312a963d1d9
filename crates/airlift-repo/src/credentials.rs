//! Registry credentials
//!
//! Explicit credentials win; otherwise the ambient Docker config
//! (`~/.docker/config.json`) is consulted, and finally anonymous access.

use base64::Engine;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Username and password for a registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Docker config.json format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DockerAuth {
    fn credentials(&self) -> Option<RegistryCredentials> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Some(RegistryCredentials::new(u, p));
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(self.auth.as_ref()?)
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some(RegistryCredentials::new(user, pass))
    }
}

impl DockerConfig {
    /// Load from the default location
    ///
    /// A missing or unreadable config yields an empty one.
    pub fn load_default() -> Self {
        match default_docker_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    /// Load from a path, falling back to an empty config with a warning
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "ignoring unreadable Docker config"
            );
            Self::default()
        })
    }

    /// Load from a path, or an empty config if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: DockerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Credentials stored for a registry host
    pub fn credentials_for(&self, registry: &str) -> Option<RegistryCredentials> {
        let mut candidates = vec![
            registry.to_string(),
            format!("https://{}", registry),
            format!("http://{}", registry),
            format!("https://{}/v1/", registry),
            format!("https://{}/v2/", registry),
        ];
        if registry == "docker.io" || registry == "index.docker.io" {
            candidates.push("https://index.docker.io/v1/".to_string());
        }

        candidates
            .iter()
            .filter_map(|c| self.auths.get(c))
            .find_map(DockerAuth::credentials)
    }
}

fn default_docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

/// Whether a registry host is loopback or cluster-local
///
/// Such registries are reached anonymously over plain HTTP.
pub fn is_local_registry(registry: &str) -> bool {
    let host = registry
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or(registry);
    let host = if host.starts_with('[') {
        host.split_once(']').map(|(h, _)| &host[..h.len() + 1]).unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };

    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        || host.ends_with(".local")
        || host.ends_with(".svc.cluster.local")
}

/// Pick the auth for talking to `registry`
pub fn resolve_auth(
    registry: &str,
    explicit: Option<&RegistryCredentials>,
    docker_config: &DockerConfig,
) -> RegistryAuth {
    if is_local_registry(registry) {
        return RegistryAuth::Anonymous;
    }
    if let Some(creds) = explicit {
        return RegistryAuth::Basic(creds.username.clone(), creds.password.clone());
    }
    match docker_config.credentials_for(registry) {
        Some(creds) => RegistryAuth::Basic(creds.username, creds.password),
        None => RegistryAuth::Anonymous,
    }
}

/// Credentials from two environment variables, if both are set
pub fn credentials_from_env(username_var: &str, password_var: &str) -> Result<Option<RegistryCredentials>> {
    match (std::env::var(username_var), std::env::var(password_var)) {
        (Ok(u), Ok(p)) => Ok(Some(RegistryCredentials::new(u, p))),
        (Err(_), Err(_)) => Ok(None),
        _ => Err(RepoError::AuthFailed {
            message: format!(
                "both {} and {} must be set to use registry credentials",
                username_var, password_var
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn docker_config() -> DockerConfig {
        serde_json::from_str(
            r#"{
                "auths": {
                    "ghcr.io": { "auth": "dXNlcjpwYXNz" },
                    "https://index.docker.io/v1/": { "username": "hub", "password": "secret" }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_local_registries() {
        assert!(is_local_registry("localhost:5000"));
        assert!(is_local_registry("127.0.0.1:5000"));
        assert!(is_local_registry("[::1]:5000"));
        assert!(is_local_registry("registry.local"));
        assert!(is_local_registry("registry.airlift.svc.cluster.local:5000"));
        assert!(!is_local_registry("ghcr.io"));
        assert!(!is_local_registry("localhost.example.com"));
    }

    #[test]
    fn test_docker_config_lookup() {
        let config = docker_config();
        assert_eq!(
            config.credentials_for("ghcr.io"),
            Some(RegistryCredentials::new("user", "pass"))
        );
        assert_eq!(
            config.credentials_for("docker.io"),
            Some(RegistryCredentials::new("hub", "secret"))
        );
        assert_eq!(config.credentials_for("quay.io"), None);
    }

    #[test]
    fn test_resolve_auth_order() {
        let config = docker_config();
        let explicit = RegistryCredentials::new("me", "pw");

        assert!(matches!(
            resolve_auth("localhost:5000", Some(&explicit), &config),
            RegistryAuth::Anonymous
        ));
        assert!(matches!(
            resolve_auth("ghcr.io", Some(&explicit), &config),
            RegistryAuth::Basic(u, _) if u == "me"
        ));
        assert!(matches!(
            resolve_auth("ghcr.io", None, &config),
            RegistryAuth::Basic(u, _) if u == "user"
        ));
        assert!(matches!(
            resolve_auth("quay.io", None, &config),
            RegistryAuth::Anonymous
        ));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = DockerConfig::load(&temp.path().join("config.json")).unwrap();
        assert!(config.auths.is_empty());
    }

    #[test]
    fn test_malformed_file_falls_back_to_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(DockerConfig::load(&path).is_err());
        let config = DockerConfig::load_or_default(&path);
        assert!(config.auths.is_empty());
        assert!(config.credentials_for("registry.example.com").is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = RegistryCredentials::new("user", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_env_credentials() {
        // SAFETY: Test runs in single thread, no concurrent access to env vars
        unsafe {
            std::env::set_var("AIRLIFT_TEST_USER", "testuser");
            std::env::set_var("AIRLIFT_TEST_PASS", "testpass");
        }

        let creds = credentials_from_env("AIRLIFT_TEST_USER", "AIRLIFT_TEST_PASS").unwrap();
        assert_eq!(creds, Some(RegistryCredentials::new("testuser", "testpass")));

        assert!(credentials_from_env("AIRLIFT_TEST_USER", "AIRLIFT_TEST_MISSING").is_err());
        assert_eq!(
            credentials_from_env("AIRLIFT_TEST_NONE_A", "AIRLIFT_TEST_NONE_B").unwrap(),
            None
        );

        // SAFETY: Test runs in single thread, no concurrent access to env vars
        unsafe {
            std::env::remove_var("AIRLIFT_TEST_USER");
            std::env::remove_var("AIRLIFT_TEST_PASS");
        }
    }
}
