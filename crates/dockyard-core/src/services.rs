//! Per-slot service orchestration: startup, URL resolution, verification,
//! and health-check-with-retry recovery.

use crate::config::OrchestratorConfig;
use crate::ports::{ServiceKind, SessionKey};
use crate::script;
use crate::slot::RepositorySlot;
use dockyard_provider::SharedProvider;
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolved public URLs for one slot. A missing entry means URL resolution
/// failed for that service; the service itself may still be running.
#[derive(Debug, Clone, Default)]
pub struct SlotUrls {
    pub editor: Option<String>,
    pub terminal: Option<String>,
    pub primary_assistant: Option<String>,
    pub secondary_assistant: Option<String>,
}

impl SlotUrls {
    pub fn url(&self, kind: ServiceKind) -> Option<&str> {
        match kind {
            ServiceKind::Editor => self.editor.as_deref(),
            ServiceKind::Terminal => self.terminal.as_deref(),
            ServiceKind::PrimaryAssistant => self.primary_assistant.as_deref(),
            ServiceKind::SecondaryAssistant => self.secondary_assistant.as_deref(),
        }
    }

    fn set(&mut self, kind: ServiceKind, url: Option<String>) {
        match kind {
            ServiceKind::Editor => self.editor = url,
            ServiceKind::Terminal => self.terminal = url,
            ServiceKind::PrimaryAssistant => self.primary_assistant = url,
            ServiceKind::SecondaryAssistant => self.secondary_assistant = url,
        }
    }
}

/// Outcome of the health-check-with-retry loop. Degraded health is a
/// result, never an error.
#[derive(Debug, Clone, Copy)]
pub struct HealthOutcome {
    pub healthy: bool,
    /// Full restarts performed before settling on this outcome
    pub restarts: u32,
}

/// Generates per-slot startup scripts, launches services concurrently,
/// retrieves their public URLs, and verifies and restarts them.
pub struct ServiceOrchestrator {
    provider: SharedProvider,
    config: OrchestratorConfig,
}

impl ServiceOrchestrator {
    pub fn new(provider: SharedProvider, config: OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    /// Externally callable recovery entry point: regenerate scripts,
    /// relaunch, and re-resolve URLs for an already-provisioned slot,
    /// without recreating the sandbox. Idempotent thanks to the session
    /// guard in every startup script.
    pub async fn restart_services(&self, sandbox_id: &str, slot: &RepositorySlot) -> SlotUrls {
        self.launch_slot(sandbox_id, slot).await;
        self.resolve_urls(sandbox_id, slot).await
    }

    /// Write and invoke the startup script for every service kind; all
    /// launches for the slot are issued concurrently.
    pub async fn launch_slot(&self, sandbox_id: &str, slot: &RepositorySlot) {
        let launches = ServiceKind::ALL
            .iter()
            .map(|kind| self.launch_service(sandbox_id, slot, *kind));
        join_all(launches).await;
    }

    async fn launch_service(&self, sandbox_id: &str, slot: &RepositorySlot, kind: ServiceKind) {
        let key = SessionKey::new(kind, &slot.source.name);
        let command = script::service_command(kind, slot, &self.config);
        let workdir = slot.path.display().to_string();
        let body = script::startup_script(&key, &workdir, &command);
        let timeout = Duration::from_secs(self.config.exec_timeout_secs);

        let write = script::write_script_command(&key, &body);
        if let Err(error) = self.provider.exec(sandbox_id, &write, None, timeout).await {
            warn!(id = %sandbox_id, session = %key.session_name(), %error, "Failed to write startup script");
            return;
        }

        let launch = script::launch_command(&key);
        match self.provider.exec(sandbox_id, &launch, None, timeout).await {
            Ok(output) if output.success => {
                debug!(id = %sandbox_id, session = %key.session_name(), "Service launched");
            }
            Ok(output) => {
                // An already-running session attaches and may exit nonzero
                // when detached; log and move on, the health loop decides.
                warn!(
                    id = %sandbox_id,
                    session = %key.session_name(),
                    exit_code = output.exit_code,
                    "Service launch exited nonzero"
                );
            }
            Err(error) => {
                warn!(id = %sandbox_id, session = %key.session_name(), %error, "Service launch errored");
            }
        }
    }

    /// Resolve public URLs for all service kinds of a slot concurrently.
    pub async fn resolve_urls(&self, sandbox_id: &str, slot: &RepositorySlot) -> SlotUrls {
        let requests = ServiceKind::ALL.iter().map(|kind| async move {
            let port = slot.ports.port(*kind);
            match self.provider.preview_url(sandbox_id, port).await {
                Ok(url) => (*kind, Some(url)),
                Err(error) => {
                    warn!(id = %sandbox_id, %kind, port, %error, "Failed to resolve preview URL");
                    (*kind, None)
                }
            }
        });

        let mut urls = SlotUrls::default();
        for (kind, url) in join_all(requests).await {
            urls.set(kind, url);
        }
        urls
    }

    /// After the settle delay, check the sandbox's listening-socket table
    /// for all of the slot's ports in one combined command. Logs the
    /// outcome; never raises.
    pub async fn verify_listening(&self, sandbox_id: &str, slot: &RepositorySlot) {
        tokio::time::sleep(Duration::from_secs(self.config.settle_delay_secs)).await;

        let timeout = Duration::from_secs(self.config.exec_timeout_secs);
        match self
            .provider
            .exec(sandbox_id, &script::socket_check_command(), None, timeout)
            .await
        {
            Ok(output) => {
                let missing = script::missing_ports(&output.stdout, &slot.ports);
                if missing.is_empty() {
                    info!(id = %sandbox_id, slot = slot.index, "All slot ports listening");
                } else {
                    warn!(id = %sandbox_id, slot = slot.index, ?missing, "Slot ports not yet listening");
                }
            }
            Err(error) => {
                warn!(id = %sandbox_id, slot = slot.index, %error, "Socket check failed");
            }
        }
    }

    /// Health-check-with-retry loop.
    ///
    /// Probes the critical services; on failure backs off, performs a full
    /// restart (kill, regenerate scripts, relaunch, settle), and re-probes.
    /// Restart attempts are strictly sequential. Stops immediately on the
    /// first successful probe, or after `max_restarts` attempts with
    /// degraded health.
    pub async fn ensure_healthy(&self, sandbox_id: &str, slot: &RepositorySlot) -> HealthOutcome {
        let mut restarts = 0;
        loop {
            if self.probe_critical(sandbox_id, slot).await {
                if restarts > 0 {
                    info!(id = %sandbox_id, slot = slot.index, restarts, "Services recovered");
                }
                return HealthOutcome {
                    healthy: true,
                    restarts,
                };
            }

            if restarts >= self.config.max_restarts {
                warn!(
                    id = %sandbox_id,
                    slot = slot.index,
                    restarts,
                    "Giving up on slot health, reporting degraded"
                );
                return HealthOutcome {
                    healthy: false,
                    restarts,
                };
            }

            tokio::time::sleep(Duration::from_secs(self.config.retry_backoff_secs)).await;
            restarts += 1;
            info!(id = %sandbox_id, slot = slot.index, attempt = restarts, "Restarting slot services");

            let timeout = Duration::from_secs(self.config.exec_timeout_secs);
            if let Err(error) = self
                .provider
                .exec(sandbox_id, &script::kill_slot_command(slot), None, timeout)
                .await
            {
                warn!(id = %sandbox_id, slot = slot.index, %error, "Kill sweep failed before restart");
            }

            self.launch_slot(sandbox_id, slot).await;
            tokio::time::sleep(Duration::from_secs(self.config.settle_delay_secs)).await;
        }
    }

    /// Concurrent HTTP probes against the critical services. Any probe
    /// error counts as unhealthy.
    async fn probe_critical(&self, sandbox_id: &str, slot: &RepositorySlot) -> bool {
        let timeout_secs = self.config.probe_timeout_secs;
        // Give the transport a little room beyond curl's own limit.
        let exec_timeout = Duration::from_secs(timeout_secs + 2);

        let probes = ServiceKind::CRITICAL.iter().map(|kind| async move {
            let port = slot.ports.port(*kind);
            let command = script::probe_command(port, timeout_secs);
            match self
                .provider
                .exec(sandbox_id, &command, None, exec_timeout)
                .await
            {
                Ok(output) => script::probe_ok(&output.stdout),
                Err(error) => {
                    debug!(id = %sandbox_id, %kind, port, %error, "Health probe errored");
                    false
                }
            }
        });

        join_all(probes).await.into_iter().all(|ok| ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::ports::PortAllocator;
    use crate::slot::{RepoSource, SourceKind};
    use dockyard_provider::mock::MockExec;
    use dockyard_provider::{ExecOutput, MockProvider, ResourceSpec, SandboxProvider};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            settle_delay_secs: 0,
            retry_backoff_secs: 0,
            ..OrchestratorConfig::default()
        }
    }

    fn slot(name: &str, index: usize) -> RepositorySlot {
        RepositorySlot::new(
            index,
            RepoSource {
                url: Some(format!("https://github.com/acme/{name}.git")),
                name: name.to_string(),
                description: None,
                kind: SourceKind::Github,
            },
            PortAllocator::new(PortConfig::default()).allocate(index),
        )
    }

    async fn started_sandbox(provider: &MockProvider) -> String {
        let sandbox = provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();
        provider.start(&sandbox.id).await.unwrap();
        sandbox.id
    }

    fn orchestrator(provider: &MockProvider) -> ServiceOrchestrator {
        ServiceOrchestrator::new(Arc::new(provider.clone()), fast_config())
    }

    #[tokio::test]
    async fn test_launch_writes_and_runs_one_script_per_kind() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;

        orchestrator(&provider).launch_slot(&id, &slot("r1", 0)).await;

        assert_eq!(provider.exec_count_matching("cat > /tmp/dockyard/"), 4);
        assert_eq!(provider.exec_count_matching("sh /tmp/dockyard/"), 4);
        assert_eq!(provider.exec_count_matching("editor-r1.sh"), 2); // write + launch
        assert_eq!(provider.exec_count_matching("main-r1.sh"), 2);
    }

    #[tokio::test]
    async fn test_relaunch_is_idempotent_per_session() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        let orchestrator = orchestrator(&provider);
        let slot = slot("r1", 0);

        orchestrator.launch_slot(&id, &slot).await;
        orchestrator.launch_slot(&id, &slot).await;

        // Same session names both times; the script's has-session guard is
        // what turns the second launch into an attach instead of a spawn.
        let writes: Vec<String> = provider
            .exec_log()
            .into_iter()
            .filter(|c| c.contains("editor-r1.sh") && c.contains("cat >"))
            .collect();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
        assert!(writes[0].contains("tmux has-session"));
    }

    #[tokio::test]
    async fn test_resolve_urls_per_service_kind() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;

        let urls = orchestrator(&provider).resolve_urls(&id, &slot("r1", 0)).await;
        assert!(urls.editor.unwrap().contains("8080"));
        assert!(urls.terminal.unwrap().contains("10000"));
        assert!(urls.primary_assistant.is_some());
        assert!(urls.secondary_assistant.is_some());
    }

    #[tokio::test]
    async fn test_healthy_probe_stops_loop_immediately() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.stub_exec(
            "curl",
            MockExec::Output(ExecOutput::success("200")),
        );

        let outcome = orchestrator(&provider).ensure_healthy(&id, &slot("r1", 0)).await;
        assert!(outcome.healthy);
        assert_eq!(outcome.restarts, 0);
        assert_eq!(provider.exec_count_matching("pkill"), 0);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_restarts_twice() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        // Attempt 1: both critical probes fail. Attempt 2: editor fails.
        // Everything after that succeeds.
        provider.expect_exec("curl", MockExec::Output(ExecOutput::success("000")));
        provider.expect_exec("curl", MockExec::Output(ExecOutput::success("000")));
        provider.expect_exec("curl", MockExec::Output(ExecOutput::success("000")));
        provider.stub_exec("curl", MockExec::Output(ExecOutput::success("200")));

        let outcome = orchestrator(&provider).ensure_healthy(&id, &slot("r1", 0)).await;
        assert!(outcome.healthy);
        assert_eq!(outcome.restarts, 2);
        assert_eq!(provider.exec_count_matching("pkill"), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_restarts() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.stub_exec("curl", MockExec::Output(ExecOutput::success("000")));

        let outcome = orchestrator(&provider).ensure_healthy(&id, &slot("r1", 0)).await;
        assert!(!outcome.healthy);
        assert_eq!(outcome.restarts, 3);
        // 1 initial probe + 3 post-restart probes, 2 critical kinds each.
        assert_eq!(provider.exec_count_matching("curl"), 8);
    }
}
