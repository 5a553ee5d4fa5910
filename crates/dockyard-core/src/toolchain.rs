//! Idempotent toolchain installation inside a sandbox.
//!
//! The sandbox's installed-tool set is discovered by shell probes, then
//! reconciled against the desired set: only the missing subset is installed,
//! so re-running provisioning against an already-initialized sandbox skips
//! the multi-minute install steps. Probes that error out are treated as
//! missing, so installation is attempted rather than silently skipped.

use crate::config::ToolchainConfig;
use crate::error::{CoreResult, ProvisionError};
use dockyard_provider::SharedProvider;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Desired-set minus probed-actual-set = install-set. Order follows the
/// desired list so batched install commands are stable.
pub fn reconcile(desired: &[String], present: &HashSet<String>) -> Vec<String> {
    desired
        .iter()
        .filter(|package| !present.contains(package.as_str()))
        .cloned()
        .collect()
}

/// Presence check for one executable.
fn probe_command(tool: &str) -> String {
    format!("command -v {tool} >/dev/null 2>&1")
}

/// Idempotently ensures required and optional command-line tools exist
/// inside a sandbox. The toolchain is sandbox-global, not per-slot.
pub struct ToolchainInstaller {
    provider: SharedProvider,
    config: ToolchainConfig,
}

impl ToolchainInstaller {
    pub fn new(provider: SharedProvider, config: ToolchainConfig) -> Self {
        Self { provider, config }
    }

    /// Run the full sequence once per sandbox: base packages, editor
    /// server, web terminal bridge, source-control CLI, then the optional
    /// assistant CLI.
    pub async fn ensure_all(&self, sandbox_id: &str) -> CoreResult<()> {
        self.ensure_base_packages(sandbox_id).await?;
        self.install_editor_server(sandbox_id).await?;
        self.install_web_terminal(sandbox_id).await?;
        self.ensure_source_control_cli(sandbox_id).await?;
        self.install_assistant_cli(sandbox_id).await;
        Ok(())
    }

    /// Probe every baseline package concurrently and install the missing
    /// subset in one batched command.
    pub async fn ensure_base_packages(&self, sandbox_id: &str) -> CoreResult<()> {
        let present = self.probe_present(sandbox_id).await;
        let missing = reconcile(&self.config.base_packages, &present);

        if missing.is_empty() {
            debug!(id = %sandbox_id, "All base packages present, skipping install");
            return Ok(());
        }

        info!(id = %sandbox_id, packages = ?missing, "Installing missing base packages");
        let command = format!(
            "sudo apt-get update -qq && sudo apt-get install -y --no-install-recommends {}",
            missing.join(" ")
        );
        self.run_mandatory(
            sandbox_id,
            "base packages",
            &command,
            Duration::from_secs(self.config.install_timeout_secs),
        )
        .await
    }

    /// Install the editor server if it is not already on PATH.
    pub async fn install_editor_server(&self, sandbox_id: &str) -> CoreResult<()> {
        self.ensure_tool(
            sandbox_id,
            "code-server",
            "curl -fsSL https://code-server.dev/install.sh | sh",
            Duration::from_secs(self.config.editor_timeout_secs),
        )
        .await
    }

    /// Install the terminal-multiplexing web bridge.
    pub async fn install_web_terminal(&self, sandbox_id: &str) -> CoreResult<()> {
        self.ensure_tool(
            sandbox_id,
            "ttyd",
            "sudo apt-get install -y ttyd",
            Duration::from_secs(self.config.terminal_bridge_timeout_secs),
        )
        .await
    }

    /// Install the source-control CLI.
    pub async fn ensure_source_control_cli(&self, sandbox_id: &str) -> CoreResult<()> {
        self.ensure_tool(
            sandbox_id,
            "gh",
            "sudo apt-get install -y gh",
            Duration::from_secs(self.config.git_cli_timeout_secs),
        )
        .await
    }

    /// Install the AI-assistant CLI. Optional: failure is logged and
    /// swallowed so the pipeline continues without that capability.
    /// Returns whether the assistant is available.
    pub async fn install_assistant_cli(&self, sandbox_id: &str) -> bool {
        let command = &self.config.assistant_install_command;
        let timeout = Duration::from_secs(self.config.install_timeout_secs);

        match self.provider.exec(sandbox_id, command, None, timeout).await {
            Ok(output) if output.success => {
                info!(id = %sandbox_id, "Assistant CLI installed");
                true
            }
            Ok(output) => {
                warn!(
                    id = %sandbox_id,
                    exit_code = output.exit_code,
                    "Assistant CLI install failed, continuing without assistant"
                );
                false
            }
            Err(error) => {
                warn!(
                    id = %sandbox_id,
                    %error,
                    "Assistant CLI install errored, continuing without assistant"
                );
                false
            }
        }
    }

    /// Concurrent presence checks for all baseline packages. An errored or
    /// timed-out probe counts as missing.
    async fn probe_present(&self, sandbox_id: &str) -> HashSet<String> {
        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let probes = self.config.base_packages.iter().map(|package| async move {
            let result = self
                .provider
                .exec(sandbox_id, &probe_command(package), None, timeout)
                .await;
            match result {
                Ok(output) if output.success => Some(package.clone()),
                Ok(_) => None,
                Err(error) => {
                    warn!(id = %sandbox_id, package = %package, %error, "Presence check errored, treating as missing");
                    None
                }
            }
        });

        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Probe for one tool and install it when missing.
    async fn ensure_tool(
        &self,
        sandbox_id: &str,
        tool: &str,
        install_command: &str,
        timeout: Duration,
    ) -> CoreResult<()> {
        let probe_timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let present = matches!(
            self.provider
                .exec(sandbox_id, &probe_command(tool), None, probe_timeout)
                .await,
            Ok(output) if output.success
        );

        if present {
            debug!(id = %sandbox_id, tool = %tool, "Tool already installed");
            return Ok(());
        }

        info!(id = %sandbox_id, tool = %tool, "Installing tool");
        self.run_mandatory(sandbox_id, tool, install_command, timeout)
            .await
    }

    /// Run a mandatory install step; any failure names the step.
    async fn run_mandatory(
        &self,
        sandbox_id: &str,
        tool: &str,
        command: &str,
        timeout: Duration,
    ) -> CoreResult<()> {
        match self.provider.exec(sandbox_id, command, None, timeout).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(ProvisionError::ToolchainFailed {
                sandbox_id: sandbox_id.to_string(),
                tool: tool.to_string(),
                exit_code: output.exit_code,
                output: output.combined(),
            }),
            Err(error) => Err(ProvisionError::ToolchainFailed {
                sandbox_id: sandbox_id.to_string(),
                tool: tool.to_string(),
                exit_code: -1,
                output: error.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_provider::mock::MockExec;
    use dockyard_provider::{ExecOutput, MockProvider, ResourceSpec, SandboxProvider};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn desired(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reconcile_subtracts_present() {
        let present: HashSet<String> = ["git".to_string(), "jq".to_string()].into();
        let missing = reconcile(&desired(&["git", "curl", "jq", "tmux"]), &present);
        assert_eq!(missing, desired(&["curl", "tmux"]));
    }

    #[test]
    fn test_reconcile_empty_when_all_present() {
        let present: HashSet<String> = ["git".to_string()].into();
        assert!(reconcile(&desired(&["git"]), &present).is_empty());
    }

    async fn started_sandbox(provider: &MockProvider) -> String {
        let sandbox = provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();
        provider.start(&sandbox.id).await.unwrap();
        sandbox.id
    }

    fn installer(provider: &MockProvider) -> ToolchainInstaller {
        ToolchainInstaller::new(Arc::new(provider.clone()), ToolchainConfig::default())
    }

    #[tokio::test]
    async fn test_base_packages_skip_install_when_present() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        // Default mock behavior: every command succeeds, so every probe
        // reports present.
        installer(&provider).ensure_base_packages(&id).await.unwrap();
        assert_eq!(provider.exec_count_matching("apt-get install"), 0);
    }

    #[tokio::test]
    async fn test_base_packages_install_only_missing() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.expect_exec(
            "command -v tmux",
            MockExec::Output(ExecOutput::failure(1, "")),
        );

        installer(&provider).ensure_base_packages(&id).await.unwrap();

        let installs: Vec<String> = provider
            .exec_log()
            .into_iter()
            .filter(|c| c.contains("apt-get install"))
            .collect();
        assert_eq!(installs.len(), 1);
        assert!(installs[0].contains("tmux"));
        assert!(!installs[0].contains(" git"), "present packages must not reinstall");
    }

    #[tokio::test]
    async fn test_probe_error_treated_as_missing() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.expect_exec("command -v curl", MockExec::Timeout);

        installer(&provider).ensure_base_packages(&id).await.unwrap();
        assert_eq!(provider.exec_count_matching("apt-get install"), 1);
    }

    #[tokio::test]
    async fn test_mandatory_failure_names_the_step() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.expect_exec(
            "command -v code-server",
            MockExec::Output(ExecOutput::failure(1, "")),
        );
        provider.expect_exec(
            "code-server.dev/install.sh",
            MockExec::Output(ExecOutput::failure(100, "download failed")),
        );

        let err = installer(&provider)
            .install_editor_server(&id)
            .await
            .unwrap_err();
        match err {
            ProvisionError::ToolchainFailed { tool, exit_code, .. } => {
                assert_eq!(tool, "code-server");
                assert_eq!(exit_code, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_assistant_failure_is_swallowed() {
        let provider = MockProvider::new();
        let id = started_sandbox(&provider).await;
        provider.expect_exec(
            "pip install",
            MockExec::Output(ExecOutput::failure(1, "no network")),
        );

        assert!(!installer(&provider).install_assistant_cli(&id).await);
    }
}
