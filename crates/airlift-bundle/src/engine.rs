//! External commands: container engine, kubectl and helm
//!
//! Everything that shells out goes through [`CommandRunner`], so pipelines can
//! be exercised against [`ScriptedRunner`] without the tools installed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use airlift_repo::RegistryCredentials;

use crate::error::{BundleError, Result};

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `program arg1 arg2 ...`
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// A long-running child process, killed when the guard is dropped
pub struct TunnelGuard {
    label: String,
    child: Option<Child>,
}

impl TunnelGuard {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child: Some(child),
        }
    }

    /// A guard with no process behind it
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for TunnelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelGuard")
            .field("label", &self.label)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            tracing::debug!(tunnel = %self.label, "stopping tunnel");
            if let Err(e) = child.start_kill() {
                tracing::warn!(tunnel = %self.label, error = %e, "failed to stop tunnel");
            }
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Whether `program` can be found
    fn is_available(&self, program: &str) -> bool;

    /// Run to completion, capturing output. A non-zero exit is not an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Start a background process owned by the returned guard
    async fn spawn(&self, spec: &CommandSpec) -> Result<TunnelGuard>;
}

/// Runs commands as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn is_available(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec.command_line(), "running");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BundleError::engine(format!("failed to start {}: {}", spec.program, e)))?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<TunnelGuard> {
        tracing::debug!(command = %spec.command_line(), "spawning");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BundleError::engine(format!("failed to start {}: {}", spec.program, e)))?;

        Ok(TunnelGuard::new(spec.command_line(), child))
    }
}

/// In-memory runner for testing
///
/// Programs must be registered with [`ScriptedRunner::with_program`] to be
/// available. Responses are keyed by `"<program> <first arg>"`; unscripted
/// commands succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    available: Arc<Mutex<HashSet<String>>>,
    responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(self, program: &str) -> Self {
        lock(&self.available).insert(program.to_string());
        self
    }

    /// Answer `"<program> <subcommand>"` with `output`
    pub fn respond(self, command: &str, output: CommandOutput) -> Self {
        lock(&self.responses).insert(command.to_string(), output);
        self
    }

    /// Every command run or spawned, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    fn record(&self, spec: &CommandSpec) -> Result<()> {
        lock(&self.calls).push(spec.clone());
        if lock(&self.available).contains(&spec.program) {
            Ok(())
        } else {
            Err(BundleError::engine(format!("{} not found", spec.program)))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn is_available(&self, program: &str) -> bool {
        lock(&self.available).contains(program)
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.record(spec)?;
        let key = match spec.args.first() {
            Some(sub) => format!("{} {}", spec.program, sub),
            None => spec.program.clone(),
        };
        Ok(lock(&self.responses)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<TunnelGuard> {
        self.record(spec)?;
        Ok(TunnelGuard::detached(spec.command_line()))
    }
}

/// Drop the registry host from a reference: `localhost:5000/team/app:v1` → `team/app:v1`
pub fn strip_registry(reference: &str) -> &str {
    match reference.split_once('/') {
        Some((_, rest)) => rest,
        None => reference,
    }
}

/// Name under which `docker load` registered an image
///
/// `Loaded image: X` gives `X`. `Loaded image ID: sha256:...` carries no name,
/// so the target reference without its registry is used; anything else falls
/// back to the target itself.
pub fn parse_load_output(output: &str, target: &str) -> String {
    if let Some((_, rest)) = output.split_once("Loaded image:") {
        let name = rest.lines().next().unwrap_or_default().trim();
        if !name.is_empty() {
            return name.to_string();
        }
    } else if output.contains("Loaded image ID:") {
        tracing::debug!(image = %target, "image loaded by ID, using target name");
        return strip_registry(target).to_string();
    }
    target.to_string()
}

/// A docker-compatible container engine CLI
#[derive(Clone)]
pub struct ContainerEngine {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl ContainerEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_available(&self) -> bool {
        self.runner.is_available(&self.program)
    }

    async fn checked<I, S>(&self, args: I, stdin: Option<&str>) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(&self.program, args);
        if let Some(input) = stdin {
            spec = spec.with_stdin(input);
        }
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(BundleError::engine(format!(
                "`{}` exited with status {}: {}",
                spec.command_line(),
                output.code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    /// `login <registry> -u <user> --password-stdin`
    pub async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        self.checked(
            ["login", registry, "-u", credentials.username.as_str(), "--password-stdin"],
            Some(&credentials.password),
        )
        .await?;
        Ok(())
    }

    /// Load an archive, returning the engine's combined output
    pub async fn load(&self, archive: &Path) -> Result<String> {
        let archive = archive.display().to_string();
        let output = self.checked(["load", "-i", archive.as_str()], None).await?;
        Ok(output.combined())
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.checked(["tag", source, target], None).await?;
        Ok(())
    }

    pub async fn push(&self, target: &str) -> Result<()> {
        self.checked(["push", target], None).await?;
        Ok(())
    }

    /// Load, tag and push an image archive as `target`
    pub async fn push_archive(&self, archive: &Path, target: &str) -> Result<()> {
        let output = self.load(archive).await?;
        let loaded = parse_load_output(&output, target);
        if loaded != target {
            self.tag(&loaded, target).await?;
        }
        self.push(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_output() {
        assert_eq!(
            parse_load_output(
                "Loaded image: docker.io/library/nginx:1.25\n",
                "localhost:5000/library/nginx:1.25"
            ),
            "docker.io/library/nginx:1.25"
        );
        assert_eq!(
            parse_load_output(
                "Loaded image ID: sha256:0123abcd\n",
                "localhost:5000/library/nginx:1.25"
            ),
            "library/nginx:1.25"
        );
        assert_eq!(parse_load_output("", "registry.local/app:v1"), "registry.local/app:v1");
    }

    #[test]
    fn test_command_line() {
        let spec = CommandSpec::new("docker", ["push", "localhost:5000/app:v1"]);
        insta::assert_snapshot!(spec.command_line(), @"docker push localhost:5000/app:v1");
    }

    #[tokio::test]
    async fn test_push_archive_tags_loaded_name() {
        let runner = ScriptedRunner::new().with_program("docker").respond(
            "docker load",
            CommandOutput::ok("Loaded image: bitnami/nginx:1.25\n"),
        );
        let engine = ContainerEngine::new(Arc::new(runner.clone()), "docker");

        engine
            .push_archive(
                Path::new("/bundle/images/bitnami_nginx_1.25.tar"),
                "localhost:5000/bitnami/nginx:1.25",
            )
            .await
            .unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "docker load -i /bundle/images/bitnami_nginx_1.25.tar",
                "docker tag bitnami/nginx:1.25 localhost:5000/bitnami/nginx:1.25",
                "docker push localhost:5000/bitnami/nginx:1.25",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_step_reports_stderr() {
        let runner = ScriptedRunner::new()
            .with_program("docker")
            .respond("docker push", CommandOutput::failed(1, "denied: requested access"));
        let engine = ContainerEngine::new(Arc::new(runner), "docker");

        let err = engine.push("registry.local/app:v1").await.unwrap_err();
        assert!(err.to_string().contains("denied: requested access"));
    }

    #[tokio::test]
    async fn test_login_passes_password_on_stdin() {
        let runner = ScriptedRunner::new().with_program("docker");
        let engine = ContainerEngine::new(Arc::new(runner.clone()), "docker");

        engine
            .login("registry.example.com", &RegistryCredentials::new("ci", "s3cret"))
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert!(!call.args.contains(&"s3cret".to_string()));
        assert_eq!(call.stdin.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ScriptedRunner::new();
        let engine = ContainerEngine::new(Arc::new(runner), "podman");
        assert!(!engine.is_available());
        assert!(engine.push("app:v1").await.is_err());
    }

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        if !ProcessRunner.is_available("sh") {
            return;
        }
        let output = ProcessRunner
            .run(&CommandSpec::new("sh", ["-c", "cat; echo err >&2; exit 3"]).with_stdin("hello"))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_spawned_process_does_not_stall_on_output() {
        if !ProcessRunner.is_available("sh") {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("done");
        let script = format!(
            "head -c 200000 /dev/zero >&2; head -c 200000 /dev/zero; touch '{}'",
            marker.display()
        );

        let _guard = ProcessRunner
            .spawn(&CommandSpec::new("sh", ["-c", script.as_str()]))
            .await
            .unwrap();

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(marker.exists());
    }
}
