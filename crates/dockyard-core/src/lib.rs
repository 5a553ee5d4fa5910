//! Provisioning and service orchestration core for dockyard.
//!
//! dockyard provisions short-lived remote development sandboxes: one cloud
//! sandbox per user, a fixed toolchain installed inside it, repositories
//! cloned into numbered slots, and a fixed set of long-running services
//! (code editor, terminal, AI-assistant terminals) started per slot and
//! kept healthy for the sandbox's lifetime.
//!
//! Components, leaf-first:
//!
//! - [`ports::PortAllocator`] — pure slot-index → port mapping
//! - [`lifecycle::SandboxLifecycleManager`] — sandbox CRUD and coarse health
//! - [`toolchain::ToolchainInstaller`] — idempotent tool installation
//! - [`services::ServiceOrchestrator`] — startup scripts, concurrent
//!   launches, URL resolution, health-check-with-retry
//! - [`pipeline::ProvisioningPipeline`] — the user-facing provision and
//!   repair operations composing the above

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod ports;
pub mod script;
pub mod services;
pub mod slot;
pub mod toolchain;

pub use config::{DockyardConfig, OrchestratorConfig, PortConfig, ProviderConfig, ToolchainConfig};
pub use error::{CoreResult, ProvisionError};
pub use lifecycle::{HealthStatus, SandboxLifecycleManager};
pub use pipeline::{
    ProvisionRequest, ProvisionedSlot, ProvisioningPipeline, ProvisioningResult, RepairOutcome,
    RepoRequest,
};
pub use ports::{PortAllocator, PortSet, ServiceKind, SessionKey};
pub use services::{HealthOutcome, ServiceOrchestrator, SlotUrls};
pub use slot::{RepoSource, RepositorySlot, SourceKind};
pub use toolchain::{reconcile, ToolchainInstaller};
