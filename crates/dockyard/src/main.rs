//! dockyard - remote development sandbox provisioning.
//!
//! This is the main entry point for the dockyard CLI.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dockyard_core::{DockyardConfig, ProvisionRequest, ProvisioningPipeline, RepoRequest};
use dockyard_provider::{HttpProvider, ResourceSpec, SharedProvider};
use dockyard_util::log::{self, LogConfig, LogLevel};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(author, version, about = "Remote development sandbox provisioning", long_about = None)]
struct Cli {
    /// Path to a JSON config file (default: $XDG_CONFIG_HOME/dockyard/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print output as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a sandbox, clone repositories, and start all services
    Provision {
        /// Repository to clone, as `url` or `url,name`. Repeatable;
        /// slots are assigned in the order given.
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// CPU cores (default 2)
        #[arg(long)]
        cpu: Option<u32>,

        /// Memory in GiB (default 4)
        #[arg(long)]
        memory: Option<u32>,

        /// Disk in GiB (default 10)
        #[arg(long)]
        disk: Option<u32>,
    },

    /// List sandboxes, running ones first
    List {
        /// Filter by label, as `key=value`. Repeatable.
        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Coarse health of one sandbox
    Status { id: String },

    /// Restart an existing sandbox's services without re-provisioning
    Restart { id: String },

    /// Stop a sandbox
    Stop { id: String },

    /// Delete a sandbox
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    log::init(LogConfig {
        level: if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
        ..LogConfig::default()
    });

    let config = load_config(cli.config.as_deref())?;
    let provider = build_provider(&config)?;
    let pipeline = ProvisioningPipeline::new(provider, config);

    match cli.command {
        Command::Provision {
            repos,
            cpu,
            memory,
            disk,
        } => {
            let resources = if cpu.is_some() || memory.is_some() || disk.is_some() {
                let defaults = ResourceSpec::default();
                Some(ResourceSpec {
                    cpu: cpu.unwrap_or(defaults.cpu),
                    memory_gb: memory.unwrap_or(defaults.memory_gb),
                    disk_gb: disk.unwrap_or(defaults.disk_gb),
                })
            } else {
                None
            };

            let repositories = repos
                .iter()
                .map(|spec| parse_repo(spec))
                .collect::<Result<Vec<_>>>()?;

            let result = pipeline
                .provision(ProvisionRequest {
                    resources,
                    repositories,
                })
                .await?;

            if cli.json {
                let slots: Vec<_> = result
                    .slots
                    .iter()
                    .map(|s| {
                        json!({
                            "index": s.slot.index,
                            "name": s.slot.source.name,
                            "healthy": s.healthy,
                            "editor_url": s.urls.editor,
                            "terminal_url": s.urls.terminal,
                            "assistant_url": s.urls.primary_assistant,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "sandbox_id": result.sandbox_id,
                        "message": result.message,
                        "editor_url": result.editor_url,
                        "terminal_url": result.terminal_url,
                        "assistant_url": result.assistant_url,
                        "slots": slots,
                    }))?
                );
            } else {
                println!("{}", result.message);
                for provisioned in &result.slots {
                    let slot = &provisioned.slot;
                    let health = if provisioned.healthy { "healthy" } else { "degraded" };
                    println!("slot {} ({}) [{health}]", slot.index, slot.source.name);
                    if let Some(url) = &provisioned.urls.editor {
                        println!("  editor:    {url}");
                    }
                    if let Some(url) = &provisioned.urls.terminal {
                        println!("  terminal:  {url}");
                    }
                    if let Some(url) = &provisioned.urls.primary_assistant {
                        println!("  assistant: {url}");
                    }
                }
            }
        }

        Command::List { labels } => {
            let filter = parse_labels(&labels)?;
            let filter = if filter.is_empty() { None } else { Some(filter) };
            let sandboxes = pipeline.lifecycle().list(filter.as_ref()).await?;

            if cli.json {
                let items: Vec<_> = sandboxes
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "state": s.state.to_string(),
                            "created_at": s.created_at,
                            "cpu": s.resources.cpu,
                            "memory_gb": s.resources.memory_gb,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for sandbox in &sandboxes {
                    println!(
                        "{}  {:10} {} ({}cpu/{}GiB)",
                        sandbox.id,
                        sandbox.state.to_string(),
                        sandbox.created_at.format("%Y-%m-%d %H:%M"),
                        sandbox.resources.cpu,
                        sandbox.resources.memory_gb,
                    );
                }
            }
        }

        Command::Status { id } => {
            let status = pipeline.lifecycle().status(&id).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "state": status.state.to_string(),
                        "services_healthy": status.services_healthy,
                        "message": status.message,
                    }))?
                );
            } else {
                println!(
                    "{id}: {} ({})",
                    if status.services_healthy { "healthy" } else { "unhealthy" },
                    status.message
                );
            }
        }

        Command::Restart { id } => {
            let outcome = pipeline.repair(&id).await?;
            if outcome.success {
                println!("{id}: all services restarted");
            } else {
                println!("{id}: restart completed with degraded services");
            }
            for provisioned in &outcome.slots {
                if let Some(url) = &provisioned.urls.editor {
                    println!("  slot {} editor: {url}", provisioned.slot.index);
                }
            }
        }

        Command::Stop { id } => {
            pipeline.lifecycle().stop(&id).await?;
            println!("{id}: stopped");
        }

        Command::Delete { id } => {
            pipeline.lifecycle().delete(&id).await?;
            println!("{id}: deleted");
        }
    }

    Ok(())
}

/// Load configuration, falling back to defaults when no file exists.
fn load_config(path: Option<&std::path::Path>) -> Result<DockyardConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir() {
            Some(dir) => dir.join("dockyard").join("config.json"),
            None => return Ok(DockyardConfig::default()),
        },
    };

    if !path.exists() {
        return Ok(DockyardConfig::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Build the provider client. The API credential comes from
/// `DOCKYARD_API_KEY` or the config file; missing credential is reported
/// before any provisioning call is attempted.
fn build_provider(config: &DockyardConfig) -> Result<SharedProvider> {
    let api_key = match std::env::var("DOCKYARD_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => match &config.provider.api_key {
            Some(key) => key.clone(),
            None => bail!(
                "no API credential configured: set DOCKYARD_API_KEY or provider.api_key in the config file"
            ),
        },
    };

    let provider = HttpProvider::new(&config.provider.base_url, &api_key)?;
    Ok(Arc::new(provider))
}

/// Parse `url` or `url,name` into a repository request. The name defaults
/// to the last path segment of the URL, without a `.git` suffix.
fn parse_repo(spec: &str) -> Result<RepoRequest> {
    let (url, name) = match spec.split_once(',') {
        Some((url, name)) => (url.trim(), name.trim().to_string()),
        None => {
            let url = spec.trim();
            let name = url
                .rsplit('/')
                .next()
                .unwrap_or(url)
                .trim_end_matches(".git")
                .to_string();
            (url, name)
        }
    };

    if url.is_empty() || name.is_empty() {
        bail!("invalid repository spec '{spec}': expected url[,name]");
    }

    Ok(RepoRequest {
        url: url.to_string(),
        name,
        description: None,
    })
}

fn parse_labels(specs: &[String]) -> Result<HashMap<String, String>> {
    specs
        .iter()
        .map(|spec| {
            spec.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("invalid label '{spec}': expected key=value"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_with_name() {
        let repo = parse_repo("https://github.com/acme/widget.git,widget-dev").unwrap();
        assert_eq!(repo.url, "https://github.com/acme/widget.git");
        assert_eq!(repo.name, "widget-dev");
    }

    #[test]
    fn test_parse_repo_derives_name() {
        let repo = parse_repo("https://github.com/acme/widget.git").unwrap();
        assert_eq!(repo.name, "widget");
    }

    #[test]
    fn test_parse_repo_rejects_empty() {
        assert!(parse_repo("").is_err());
        assert!(parse_repo(",name").is_err());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.ports.editor_base, 8080);
    }

    #[test]
    fn test_load_config_reads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ports": {"editor_base": 9090}}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.ports.editor_base, 9090);
        assert_eq!(config.ports.terminal_base, 10000);
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(&["owner=alice".to_string()]).unwrap();
        assert_eq!(labels.get("owner"), Some(&"alice".to_string()));
        assert!(parse_labels(&["broken".to_string()]).is_err());
    }
}
