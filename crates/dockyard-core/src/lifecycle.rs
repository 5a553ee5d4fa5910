//! Sandbox lifecycle management.
//!
//! Thin coordination layer over the provider: create/get/start/stop/delete
//! pass through with logging, `list` imposes the operator-facing ordering,
//! and `status` folds a socket check into a coarse health verdict.

use crate::config::DockyardConfig;
use crate::error::{CoreResult, ProvisionError};
use crate::ports::PortAllocator;
use crate::script;
use crate::slot::slots_from_labels;
use dockyard_provider::{ResourceSpec, Sandbox, SandboxState, SharedProvider};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coarse health of one sandbox. Recomputed on demand, never cached.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub state: SandboxState,
    pub services_healthy: bool,
    pub message: String,
}

/// Creates, fetches, starts, stops, deletes, and lists sandboxes.
pub struct SandboxLifecycleManager {
    provider: SharedProvider,
    allocator: PortAllocator,
    exec_timeout: Duration,
}

impl SandboxLifecycleManager {
    pub fn new(provider: SharedProvider, config: &DockyardConfig) -> Self {
        Self {
            provider,
            allocator: PortAllocator::new(config.ports),
            exec_timeout: Duration::from_secs(config.orchestrator.exec_timeout_secs),
        }
    }

    /// Request a new sandbox. No retry; the caller decides what a rejected
    /// request means.
    pub async fn create(
        &self,
        resources: &ResourceSpec,
        labels: &HashMap<String, String>,
    ) -> CoreResult<Sandbox> {
        let sandbox = self
            .provider
            .create(resources, labels)
            .await
            .map_err(|source| ProvisionError::SandboxCreateFailed {
                resources: *resources,
                source,
            })?;
        info!(id = %sandbox.id, cpu = resources.cpu, memory_gb = resources.memory_gb, "Sandbox created");
        Ok(sandbox)
    }

    pub async fn get(&self, id: &str) -> CoreResult<Sandbox> {
        Ok(self.provider.get(id).await?)
    }

    pub async fn start(&self, id: &str) -> CoreResult<()> {
        info!(id = %id, "Starting sandbox");
        Ok(self.provider.start(id).await?)
    }

    /// Stop a sandbox. Stopping an already-stopped sandbox is a logged
    /// no-op, not an error.
    pub async fn stop(&self, id: &str) -> CoreResult<()> {
        let sandbox = self.provider.get(id).await?;
        if sandbox.state == SandboxState::Stopped {
            debug!(id = %id, "Sandbox already stopped, nothing to do");
            return Ok(());
        }
        info!(id = %id, "Stopping sandbox");
        Ok(self.provider.stop(id).await?)
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        info!(id = %id, "Deleting sandbox");
        Ok(self.provider.delete(id).await?)
    }

    /// List sandboxes, running ones first.
    ///
    /// Order: started < starting < stopping < stopped < error/unknown, and
    /// within equal priority newest first, so operator-facing listings
    /// surface actionable sandboxes at the top.
    pub async fn list(
        &self,
        filter_labels: Option<&HashMap<String, String>>,
    ) -> CoreResult<Vec<Sandbox>> {
        let mut sandboxes = self.provider.list(filter_labels).await?;
        sandboxes.sort_by_key(|s| (s.state.list_priority(), Reverse(s.created_at)));
        Ok(sandboxes)
    }

    /// Coarse health of one sandbox.
    ///
    /// A sandbox that is not started is reported unhealthy immediately,
    /// naming its actual state; no network probe is attempted. Probe
    /// failures never escape as errors.
    pub async fn status(&self, id: &str) -> CoreResult<HealthStatus> {
        let sandbox = self.provider.get(id).await?;

        if !sandbox.state.is_started() {
            return Ok(HealthStatus {
                state: sandbox.state,
                services_healthy: false,
                message: format!("sandbox is {}", sandbox.state),
            });
        }

        match self.probe_sockets(&sandbox).await {
            Ok(status) => Ok(status),
            Err(error) => {
                warn!(id = %id, %error, "Status probe failed");
                Ok(HealthStatus {
                    state: sandbox.state,
                    services_healthy: false,
                    message: "services not responding".to_string(),
                })
            }
        }
    }

    /// Recompute expected ports for the recorded slots and check the
    /// sandbox's listening-socket table in one combined command.
    async fn probe_sockets(&self, sandbox: &Sandbox) -> CoreResult<HealthStatus> {
        // Root dir is resolved per operation; it is not stable across
        // restarts and must not be cached.
        let _root = self.provider.root_dir(&sandbox.id).await?;

        let slots = slots_from_labels(&sandbox.labels, &self.allocator);
        if slots.is_empty() {
            return Ok(HealthStatus {
                state: sandbox.state,
                services_healthy: false,
                message: "no slots recorded for sandbox".to_string(),
            });
        }

        let output = self
            .provider
            .exec(
                &sandbox.id,
                &script::socket_check_command(),
                None,
                self.exec_timeout,
            )
            .await?;

        let mut missing = Vec::new();
        for slot in &slots {
            missing.extend(script::missing_ports(&output.stdout, &slot.ports));
        }

        if missing.is_empty() {
            Ok(HealthStatus {
                state: sandbox.state,
                services_healthy: true,
                message: "all services listening".to_string(),
            })
        } else {
            Ok(HealthStatus {
                state: sandbox.state,
                services_healthy: false,
                message: format!(
                    "ports not listening: {}",
                    missing
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
        }
    }
}
