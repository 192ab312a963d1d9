//! Progress reporting for bundle operations
//!
//! Pipelines receive an `Arc<dyn ProgressReporter>` and report per-artifact
//! transitions keyed by artifact name. Reporters must tolerate calls from many
//! tasks at once.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Instant;

use console::style;

/// State of a single artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ArtifactStatus {
    fn styled_symbol(&self) -> console::StyledObject<&'static str> {
        match self {
            ArtifactStatus::Pending => style("○").dim(),
            ArtifactStatus::InProgress => style("◐").cyan(),
            ArtifactStatus::Done => style("✓").green(),
            ArtifactStatus::Failed => style("✗").red(),
        }
    }
}

/// Sink for per-artifact progress
pub trait ProgressReporter: Send + Sync {
    /// Announce a phase (e.g. "Fetching images")
    fn phase(&self, name: &str, total: usize);

    /// Move an artifact to a new status, with an optional detail message
    fn update(&self, artifact: &str, status: ArtifactStatus, message: Option<&str>);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn phase(&self, _name: &str, _total: usize) {}
    fn update(&self, _artifact: &str, _status: ArtifactStatus, _message: Option<&str>) {}
}

#[derive(Debug, Clone)]
struct ArtifactState {
    status: ArtifactStatus,
    started: Instant,
}

/// Line-oriented reporter writing to stderr
pub struct TerminalProgress {
    artifacts: Mutex<HashMap<String, ArtifactState>>,
    verbose: bool,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            artifacts: Mutex::new(HashMap::new()),
            verbose: false,
        }
    }

    /// Also print `InProgress` transitions
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Number of artifacts that ended in each terminal state: `(done, failed)`
    pub fn counts(&self) -> (usize, usize) {
        let artifacts = match self.artifacts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        artifacts.values().fold((0, 0), |(done, failed), a| match a.status {
            ArtifactStatus::Done => (done + 1, failed),
            ArtifactStatus::Failed => (done, failed + 1),
            _ => (done, failed),
        })
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TerminalProgress {
    fn phase(&self, name: &str, total: usize) {
        let _ = writeln!(
            io::stderr(),
            "\n{} {} ({})",
            style("▶").cyan().bold(),
            name,
            total
        );
    }

    fn update(&self, artifact: &str, status: ArtifactStatus, message: Option<&str>) {
        let mut artifacts = match self.artifacts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let state = artifacts
            .entry(artifact.to_string())
            .or_insert_with(|| ArtifactState {
                status,
                started: Instant::now(),
            });
        state.status = status;

        if status == ArtifactStatus::InProgress && !self.verbose {
            return;
        }

        let elapsed = match status {
            ArtifactStatus::Done | ArtifactStatus::Failed => {
                format!(" ({:.1}s)", state.started.elapsed().as_secs_f64())
            }
            _ => String::new(),
        };
        let message = message
            .map(|m| format!(" - {}", style(m).dim()))
            .unwrap_or_default();

        // written under the lock so lines from concurrent tasks never interleave
        let _ = writeln!(
            io::stderr(),
            "  {} {}{}{}",
            status.styled_symbol(),
            artifact,
            elapsed,
            message
        );
    }
}

/// Records every call, for tests
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, ArtifactStatus)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(artifact, status)` updates seen so far
    pub fn events(&self) -> Vec<(String, ArtifactStatus)> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Final status per artifact
    pub fn final_status(&self, artifact: &str) -> Option<ArtifactStatus> {
        self.events()
            .into_iter()
            .rev()
            .find(|(name, _)| name == artifact)
            .map(|(_, status)| status)
    }
}

impl ProgressReporter for RecordingProgress {
    fn phase(&self, _name: &str, _total: usize) {}

    fn update(&self, artifact: &str, status: ArtifactStatus, _message: Option<&str>) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push((artifact.to_string(), status));
    }
}
