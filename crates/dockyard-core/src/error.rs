//! Error types for provisioning operations.

use dockyard_provider::{ProviderError, ResourceSpec};
use thiserror::Error;

/// Errors that abort a provisioning or lifecycle call.
///
/// Degraded-but-not-fatal conditions (probe exhaustion, optional-capability
/// failures) are deliberately not represented here: they are reported in
/// results, never raised.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The provider rejected sandbox creation. Carries the requested
    /// resources for diagnostics.
    #[error(
        "failed to create sandbox (cpu={cpu}, memory={mem}GiB, disk={disk}GiB): {source}",
        cpu = .resources.cpu,
        mem = .resources.memory_gb,
        disk = .resources.disk_gb
    )]
    SandboxCreateFailed {
        resources: ResourceSpec,
        #[source]
        source: ProviderError,
    },

    /// The sandbox was created but refused to start.
    #[error("failed to start sandbox '{sandbox_id}': {source}")]
    SandboxStartFailed {
        sandbox_id: String,
        #[source]
        source: ProviderError,
    },

    /// The sandbox came up but its root directory could not be resolved.
    #[error("root directory unavailable for sandbox '{sandbox_id}': {source}")]
    RootDirUnavailable {
        sandbox_id: String,
        #[source]
        source: ProviderError,
    },

    /// A mandatory toolchain step failed. Names the exact step.
    #[error("toolchain step '{tool}' failed in sandbox '{sandbox_id}' (exit code {exit_code})")]
    ToolchainFailed {
        sandbox_id: String,
        tool: String,
        exit_code: i32,
        output: String,
    },

    /// Every requested repository failed to clone.
    #[error("all {requested} repository clones failed in sandbox '{sandbox_id}'")]
    AllClonesFailed {
        sandbox_id: String,
        requested: usize,
    },

    /// A provider call failed outside the wrapped cases above.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ProvisionError {
    /// The sandbox left behind by this failure, if one was created.
    ///
    /// Provisioning has no rollback; callers garbage-collect with this id.
    pub fn sandbox_id(&self) -> Option<&str> {
        match self {
            Self::SandboxCreateFailed { .. } | Self::Provider(_) => None,
            Self::SandboxStartFailed { sandbox_id, .. }
            | Self::RootDirUnavailable { sandbox_id, .. }
            | Self::ToolchainFailed { sandbox_id, .. }
            | Self::AllClonesFailed { sandbox_id, .. } => Some(sandbox_id),
        }
    }
}

/// Result type for provisioning operations.
pub type CoreResult<T> = Result<T, ProvisionError>;
