//! The top-level provisioning pipeline.
//!
//! One user-facing "create workspace" operation composing sandbox creation,
//! repository cloning, toolchain installation, and per-slot service
//! orchestration, plus a "resume/repair" operation that recovers services
//! without recreating the sandbox.
//!
//! Single attempt, no partial rollback: a sandbox left behind by a
//! mid-pipeline failure is the caller's to garbage-collect (the error
//! carries the sandbox id for that purpose).

use crate::config::DockyardConfig;
use crate::error::{CoreResult, ProvisionError};
use crate::lifecycle::SandboxLifecycleManager;
use crate::ports::PortAllocator;
use crate::services::{ServiceOrchestrator, SlotUrls};
use crate::slot::{slots_from_labels, RepoSource, RepositorySlot, SourceKind};
use crate::toolchain::ToolchainInstaller;
use dockyard_provider::{ResourceSpec, SharedProvider};
use dockyard_util::Identifier;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Label marking sandboxes managed by dockyard.
pub const MANAGED_LABEL: &str = "dockyard.managed";

/// Label recording the provisioning run that created a sandbox.
pub const RUN_LABEL: &str = "dockyard.run";

/// One repository requested for provisioning.
#[derive(Debug, Clone)]
pub struct RepoRequest {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
}

/// Input to [`ProvisioningPipeline::provision`].
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    /// Sandbox resources; 2 cpu / 4 GiB / 10 GiB when unspecified
    pub resources: Option<ResourceSpec>,
    /// Repositories in slot-assignment order. Empty means a single
    /// implicit default slot.
    pub repositories: Vec<RepoRequest>,
}

/// One provisioned slot with its resolved URLs and final health.
#[derive(Debug, Clone)]
pub struct ProvisionedSlot {
    pub slot: RepositorySlot,
    pub urls: SlotUrls,
    pub healthy: bool,
}

/// Output of one provisioning call. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProvisioningResult {
    pub sandbox_id: String,
    pub slots: Vec<ProvisionedSlot>,
    /// Primary-slot URLs surfaced at top level for single-repository callers
    pub editor_url: Option<String>,
    pub terminal_url: Option<String>,
    pub assistant_url: Option<String>,
    pub message: String,
}

/// Output of a repair call.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub success: bool,
    pub slots: Vec<ProvisionedSlot>,
}

/// Composes the lifecycle manager, toolchain installer, and service
/// orchestrator into the user-facing provisioning operations.
pub struct ProvisioningPipeline {
    provider: SharedProvider,
    allocator: PortAllocator,
    lifecycle: SandboxLifecycleManager,
    installer: ToolchainInstaller,
    orchestrator: ServiceOrchestrator,
    clone_timeout: Duration,
}

impl ProvisioningPipeline {
    pub fn new(provider: SharedProvider, config: DockyardConfig) -> Self {
        Self {
            allocator: PortAllocator::new(config.ports),
            lifecycle: SandboxLifecycleManager::new(provider.clone(), &config),
            installer: ToolchainInstaller::new(provider.clone(), config.toolchain.clone()),
            orchestrator: ServiceOrchestrator::new(provider.clone(), config.orchestrator.clone()),
            clone_timeout: Duration::from_secs(config.toolchain.clone_timeout_secs),
            provider,
        }
    }

    /// Create a sandbox, clone the requested repositories into slots,
    /// install the toolchain, and bring every slot's services up.
    pub async fn provision(&self, request: ProvisionRequest) -> CoreResult<ProvisioningResult> {
        let run_id = Identifier::run();
        info!(run = %run_id, repositories = request.repositories.len(), "Provisioning run started");

        let resources = request.resources.unwrap_or_default();
        let mut labels: HashMap<String, String> = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (RUN_LABEL.to_string(), run_id),
            ("dockyard.workspace".to_string(), Identifier::workspace()),
        ]);

        // 1. Create. No retry; a rejected request surfaces as-is.
        let sandbox = self.lifecycle.create(&resources, &labels).await?;
        let sandbox_id = sandbox.id.clone();

        // 2. Start and resolve the root directory; fail fast if either is
        // unavailable.
        self.provider.start(&sandbox_id).await.map_err(|source| {
            ProvisionError::SandboxStartFailed {
                sandbox_id: sandbox_id.clone(),
                source,
            }
        })?;
        let root = self.provider.root_dir(&sandbox_id).await.map_err(|source| {
            ProvisionError::RootDirUnavailable {
                sandbox_id: sandbox_id.clone(),
                source,
            }
        })?;
        info!(id = %sandbox_id, root = %root.display(), "Sandbox started");

        // 3. Assign slots in request order and clone. Individual clone
        // failures drop that slot; only losing every clone is fatal.
        let slots = self.assign_and_clone(&sandbox_id, &request.repositories).await?;

        // 4. Toolchain is sandbox-global: it must complete before any
        // slot's services start.
        self.installer.ensure_all(&sandbox_id).await?;

        // 5. Record slots on the sandbox so repair can rediscover them,
        // then orchestrate every slot concurrently.
        for slot in &slots {
            let (key, value) = slot.label_entry();
            labels.insert(key, value);
        }
        if let Err(error) = self.provider.set_labels(&sandbox_id, &labels).await {
            warn!(id = %sandbox_id, %error, "Failed to record slot labels");
        }

        let provisioned = self.bring_up_slots(&sandbox_id, slots).await;

        // 6. Aggregate; primary slot is the lowest index.
        let healthy = provisioned.iter().filter(|s| s.healthy).count();
        let message = if healthy == provisioned.len() {
            format!("provisioned {} slot(s) in sandbox {sandbox_id}", provisioned.len())
        } else {
            format!(
                "provisioned {} slot(s) in sandbox {sandbox_id}, {} degraded",
                provisioned.len(),
                provisioned.len() - healthy
            )
        };
        info!(id = %sandbox_id, %message, "Provisioning complete");

        let primary = provisioned.first();
        Ok(ProvisioningResult {
            editor_url: primary.and_then(|s| s.urls.editor.clone()),
            terminal_url: primary.and_then(|s| s.urls.terminal.clone()),
            assistant_url: primary.and_then(|s| s.urls.primary_assistant.clone()),
            sandbox_id,
            slots: provisioned,
            message,
        })
    }

    /// Recover an already-provisioned sandbox: restart every recorded
    /// slot's services and re-check health, without recreating anything.
    pub async fn repair(&self, sandbox_id: &str) -> CoreResult<RepairOutcome> {
        let sandbox = self.provider.get(sandbox_id).await?;

        if !sandbox.state.is_started() {
            info!(id = %sandbox_id, state = %sandbox.state, "Starting sandbox before repair");
            self.provider.start(sandbox_id).await.map_err(|source| {
                ProvisionError::SandboxStartFailed {
                    sandbox_id: sandbox_id.to_string(),
                    source,
                }
            })?;
        }

        // Root dir is never stable across restarts; re-resolve it now.
        self.provider.root_dir(sandbox_id).await.map_err(|source| {
            ProvisionError::RootDirUnavailable {
                sandbox_id: sandbox_id.to_string(),
                source,
            }
        })?;

        let slots = slots_from_labels(&sandbox.labels, &self.allocator);
        if slots.is_empty() {
            warn!(id = %sandbox_id, "No slots recorded on sandbox, nothing to repair");
            return Ok(RepairOutcome {
                success: false,
                slots: Vec::new(),
            });
        }

        let provisioned = self.bring_up_slots(sandbox_id, slots).await;
        let success = provisioned.iter().all(|s| s.healthy);
        Ok(RepairOutcome {
            success,
            slots: provisioned,
        })
    }

    /// The lifecycle manager, for status/list/stop/delete passthrough.
    pub fn lifecycle(&self) -> &SandboxLifecycleManager {
        &self.lifecycle
    }

    async fn assign_and_clone(
        &self,
        sandbox_id: &str,
        repositories: &[RepoRequest],
    ) -> CoreResult<Vec<RepositorySlot>> {
        if repositories.is_empty() {
            return Ok(vec![self.allocator.default_slot()]);
        }

        let mut slots = Vec::new();
        for (index, repo) in repositories.iter().enumerate() {
            let kind = if repo.url.contains("github.com") {
                SourceKind::Github
            } else {
                SourceKind::Manual
            };
            let slot = RepositorySlot::new(
                index,
                RepoSource {
                    url: Some(repo.url.clone()),
                    name: repo.name.clone(),
                    description: repo.description.clone(),
                    kind,
                },
                self.allocator.allocate(index),
            );

            match self.clone_repository(sandbox_id, &slot).await {
                Ok(()) => slots.push(slot),
                Err(reason) => {
                    warn!(
                        id = %sandbox_id,
                        repo = %repo.name,
                        slot = index,
                        %reason,
                        "Repository clone failed, dropping slot"
                    );
                }
            }
        }

        if slots.is_empty() {
            return Err(ProvisionError::AllClonesFailed {
                sandbox_id: sandbox_id.to_string(),
                requested: repositories.len(),
            });
        }
        Ok(slots)
    }

    /// Clone into the slot's sanitized path; a pre-existing clone is left
    /// alone.
    async fn clone_repository(
        &self,
        sandbox_id: &str,
        slot: &RepositorySlot,
    ) -> Result<(), String> {
        let url = slot.source.url.as_deref().ok_or("no clone URL")?;
        let path = slot.path.display();
        let command = format!("[ -d {path}/.git ] || git clone {url} {path}");

        match self
            .provider
            .exec(sandbox_id, &command, None, self.clone_timeout)
            .await
        {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(format!("git clone exited {}: {}", output.exit_code, output.stderr)),
            Err(error) => Err(error.to_string()),
        }
    }

    /// Launch, verify, health-check, and resolve URLs for every slot, all
    /// slots concurrently.
    async fn bring_up_slots(
        &self,
        sandbox_id: &str,
        slots: Vec<RepositorySlot>,
    ) -> Vec<ProvisionedSlot> {
        let tasks = slots.into_iter().map(|slot| async move {
            // Launch and URL resolution are the idempotent restart path;
            // verification and the health loop run on top of it.
            let urls = self.orchestrator.restart_services(sandbox_id, &slot).await;
            self.orchestrator.verify_listening(sandbox_id, &slot).await;
            let outcome = self.orchestrator.ensure_healthy(sandbox_id, &slot).await;
            ProvisionedSlot {
                slot,
                urls,
                healthy: outcome.healthy,
            }
        });

        let mut provisioned: Vec<ProvisionedSlot> = join_all(tasks).await;
        provisioned.sort_by_key(|p| p.slot.index);
        provisioned
    }
}
