//! Configuration types for provisioning and orchestration.
//!
//! Every delay, timeout, and retry limit used by the pipeline lives here
//! rather than as a literal at the call site.

use serde::{Deserialize, Serialize};

/// Top-level dockyard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockyardConfig {
    /// Base ports per service kind
    pub ports: PortConfig,
    /// Toolchain installation settings
    pub toolchain: ToolchainConfig,
    /// Service startup and health-check settings
    pub orchestrator: OrchestratorConfig,
    /// Remote provider endpoint settings
    pub provider: ProviderConfig,
}

/// Base port per service kind. `port(slot, kind) = base(kind) + slot`.
///
/// Bases must be spaced at least 1000 apart so ports stay pairwise distinct
/// for slot indices below 1000. That bound is a documented limitation, not
/// an enforced check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub editor_base: u16,
    pub terminal_base: u16,
    pub primary_assistant_base: u16,
    pub secondary_assistant_base: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            editor_base: 8080,
            terminal_base: 10000,
            primary_assistant_base: 4000,
            secondary_assistant_base: 5000,
        }
    }
}

/// Toolchain installation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Baseline packages probed for and installed in one batch when missing
    pub base_packages: Vec<String>,
    /// Timeout for one presence check
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Timeout for the batched base-package install
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    /// Timeout for the editor server install
    #[serde(default = "default_install_timeout")]
    pub editor_timeout_secs: u64,
    /// Timeout for the web terminal bridge install
    #[serde(default = "default_terminal_timeout")]
    pub terminal_bridge_timeout_secs: u64,
    /// Timeout for the source-control CLI install
    #[serde(default = "default_git_cli_timeout")]
    pub git_cli_timeout_secs: u64,
    /// Timeout for one repository clone
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
    /// Install command for the optional AI-assistant CLI. Failure here is
    /// logged and swallowed; the slot simply runs without an assistant.
    pub assistant_install_command: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            base_packages: ["git", "curl", "tmux", "ripgrep", "jq"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_timeout_secs: default_probe_timeout(),
            install_timeout_secs: default_install_timeout(),
            editor_timeout_secs: default_install_timeout(),
            terminal_bridge_timeout_secs: default_terminal_timeout(),
            git_cli_timeout_secs: default_git_cli_timeout(),
            clone_timeout_secs: default_clone_timeout(),
            assistant_install_command: "python3 -m pip install --user aider-chat".to_string(),
        }
    }
}

/// Service startup and health-check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay between launching services and checking their sockets, giving
    /// processes time to bind their ports
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
    /// Backoff before each restart attempt in the health loop
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// Maximum restart attempts before reporting degraded health
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Timeout for one HTTP health probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Timeout for ordinary remote commands (script writes, launches, kills)
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
    /// Command run inside the primary assistant session
    pub assistant_command: String,
    /// Command run inside the secondary assistant session
    pub secondary_assistant_command: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay(),
            retry_backoff_secs: default_retry_backoff(),
            max_restarts: default_max_restarts(),
            probe_timeout_secs: default_probe_timeout(),
            exec_timeout_secs: default_exec_timeout(),
            assistant_command: "aider".to_string(),
            secondary_assistant_command: "aider --watch-files".to_string(),
        }
    }
}

/// Remote provider endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the sandbox provider API
    pub base_url: String,
    /// API credential; `DOCKYARD_API_KEY` takes precedence when set
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sandboxes.dev".to_string(),
            api_key: None,
        }
    }
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_install_timeout() -> u64 {
    180
}

fn default_terminal_timeout() -> u64 {
    120
}

fn default_git_cli_timeout() -> u64 {
    60
}

fn default_clone_timeout() -> u64 {
    120
}

fn default_settle_delay() -> u64 {
    8
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_max_restarts() -> u32 {
    3
}

fn default_exec_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_bases_spaced() {
        let ports = PortConfig::default();
        let mut bases = [
            ports.editor_base,
            ports.terminal_base,
            ports.primary_assistant_base,
            ports.secondary_assistant_base,
        ];
        bases.sort_unstable();
        for pair in bases.windows(2) {
            assert!(pair[1] - pair[0] >= 1000, "bases must be >= 1000 apart");
        }
    }

    #[test]
    fn test_config_round_trip() {
        let config = DockyardConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DockyardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.orchestrator.max_restarts, 3);
        assert_eq!(parsed.orchestrator.settle_delay_secs, 8);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: DockyardConfig =
            serde_json::from_str(r#"{"orchestrator": {"max_restarts": 5}}"#).unwrap();
        assert_eq!(parsed.orchestrator.max_restarts, 5);
        assert_eq!(parsed.orchestrator.retry_backoff_secs, 5);
        assert_eq!(parsed.ports.editor_base, 8080);
    }
}
