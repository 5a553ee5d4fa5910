//! Remote sandbox provider client for dockyard.
//!
//! A sandbox is an ephemeral remote compute environment hosting all services
//! for one user. This crate defines the boundary to the provider that owns
//! those sandboxes:
//!
//! - **Http**: reqwest-based client for the provider's REST API
//! - **Mock**: in-memory provider for tests and offline development
//!
//! # Example
//!
//! ```rust,no_run
//! use dockyard_provider::{HttpProvider, ResourceSpec, SandboxProvider};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = HttpProvider::new("https://api.provider.dev", "api-key")?;
//!
//!     let sandbox = provider
//!         .create(&ResourceSpec::default(), &HashMap::new())
//!         .await?;
//!     provider.start(&sandbox.id).await?;
//!
//!     let root = provider.root_dir(&sandbox.id).await?;
//!     println!("root: {}", root.display());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod http;
pub mod mock;

pub use error::{ProviderError, ProviderResult};
pub use http::HttpProvider;
pub use mock::MockProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle state of a sandbox as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// Requested but not yet scheduled
    Pending,
    /// Coming up
    Starting,
    /// Running and ready for commands
    Started,
    /// Going down
    Stopping,
    /// Stopped, can be restarted
    Stopped,
    /// Provider-side failure
    Error,
    /// State the provider reported that we do not recognize
    Unknown,
}

impl SandboxState {
    /// Check if the sandbox is ready to execute commands.
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Sort priority for operator-facing listings: running sandboxes are
    /// actionable and surface first.
    pub fn list_priority(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Starting => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
            Self::Pending | Self::Error | Self::Unknown => 4,
        }
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Compute resources requested for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU cores
    pub cpu: u32,
    /// Memory in GiB
    pub memory_gb: u32,
    /// Disk in GiB
    pub disk_gb: u32,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: 2,
            memory_gb: 4,
            disk_gb: 10,
        }
    }
}

/// A sandbox record as reported by the provider.
///
/// The root working directory is deliberately not a field here: it is only
/// valid while the sandbox is started and is not guaranteed stable across
/// restarts, so callers must resolve it per operation via
/// [`SandboxProvider::root_dir`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Provider-assigned opaque identifier
    pub id: String,
    /// Current lifecycle state
    pub state: SandboxState,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Resources the sandbox was created with
    pub resources: ResourceSpec,
    /// Free-form labels, used by dockyard to record slot assignments
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Result of command execution inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
}

impl ExecOutput {
    /// Create a new successful output.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    /// Create a new failed output.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// Create output from stdout/stderr strings and exit code.
    pub fn from_parts(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
        }
    }

    /// Get combined output (stdout + stderr).
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Trait for sandbox provider implementations.
///
/// This is the boundary between dockyard and whatever actually runs the
/// sandboxes. Lifecycle calls map one-to-one onto provider API calls; no
/// retry happens at this layer.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Request a new sandbox with the given resources and labels.
    async fn create(
        &self,
        resources: &ResourceSpec,
        labels: &HashMap<String, String>,
    ) -> ProviderResult<Sandbox>;

    /// Fetch the current state of a sandbox.
    async fn get(&self, id: &str) -> ProviderResult<Sandbox>;

    /// Start a sandbox. Starting an already-started sandbox is a no-op.
    async fn start(&self, id: &str) -> ProviderResult<()>;

    /// Stop a sandbox. Stopping an already-stopped sandbox is a no-op.
    async fn stop(&self, id: &str) -> ProviderResult<()>;

    /// Delete a sandbox.
    async fn delete(&self, id: &str) -> ProviderResult<()>;

    /// List sandboxes visible to the caller, optionally filtered by labels.
    ///
    /// Provider order is unspecified; callers that need a stable order sort
    /// themselves.
    async fn list(
        &self,
        labels: Option<&HashMap<String, String>>,
    ) -> ProviderResult<Vec<Sandbox>>;

    /// Replace the labels on a sandbox.
    async fn set_labels(&self, id: &str, labels: &HashMap<String, String>) -> ProviderResult<()>;

    /// Resolve the root working directory inside a sandbox.
    ///
    /// Only valid while the sandbox is started; must be re-resolved after
    /// every restart.
    async fn root_dir(&self, id: &str) -> ProviderResult<PathBuf>;

    /// Execute a shell command inside a sandbox.
    ///
    /// The timeout bounds the whole round trip; expiry surfaces as
    /// [`ProviderError::Timeout`], never as a hang.
    async fn exec(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> ProviderResult<ExecOutput>;

    /// Request a public-facing URL for a port inside a sandbox.
    async fn preview_url(&self, id: &str, port: u16) -> ProviderResult<String>;
}

/// Type alias for a shared provider handle.
pub type SharedProvider = std::sync::Arc<dyn SandboxProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output() {
        let output = ExecOutput::success("hello");
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.exit_code, 0);

        let output = ExecOutput::failure(1, "error");
        assert!(!output.success);
        assert_eq!(output.stderr, "error");
        assert_eq!(output.exit_code, 1);
    }

    #[test]
    fn test_exec_output_combined() {
        let output = ExecOutput::from_parts("out".into(), "err".into(), 0);
        assert_eq!(output.combined(), "out\nerr");
        assert_eq!(ExecOutput::success("only").combined(), "only");
    }

    #[test]
    fn test_state_priority_ordering() {
        assert!(SandboxState::Started.list_priority() < SandboxState::Starting.list_priority());
        assert!(SandboxState::Stopping.list_priority() < SandboxState::Stopped.list_priority());
        assert!(SandboxState::Stopped.list_priority() < SandboxState::Error.list_priority());
        assert_eq!(
            SandboxState::Error.list_priority(),
            SandboxState::Unknown.list_priority()
        );
    }

    #[test]
    fn test_default_resources() {
        let spec = ResourceSpec::default();
        assert_eq!(spec.cpu, 2);
        assert_eq!(spec.memory_gb, 4);
        assert_eq!(spec.disk_gb, 10);
    }
}
