//! HTTP client for the remote sandbox provider REST API.

use crate::{
    error::{ProviderError, ProviderResult},
    ExecOutput, ResourceSpec, Sandbox, SandboxProvider, SandboxState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Timeout applied to plain lifecycle calls (create, get, start, stop, ...).
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra slack granted to the HTTP round trip on top of the remote command's
/// own timeout, so the provider gets a chance to report the timeout itself.
const EXEC_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// reqwest-based client for the sandbox provider.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvider {
    /// Create a new provider client with an API credential.
    pub fn new(base_url: &str, api_key: &str) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ProviderError::Unauthorized("malformed API key".to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a non-success response into a typed error.
    async fn fail(id: Option<&str>, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(body),
            StatusCode::NOT_FOUND => {
                ProviderError::NotFound(id.unwrap_or("<unknown>").to_string())
            }
            _ => ProviderError::InvalidResponse(format!("{status}: {body}")),
        }
    }
}

#[async_trait]
impl SandboxProvider for HttpProvider {
    async fn create(
        &self,
        resources: &ResourceSpec,
        labels: &HashMap<String, String>,
    ) -> ProviderResult<Sandbox> {
        debug!(cpu = resources.cpu, memory_gb = resources.memory_gb, "Creating sandbox");

        let body = CreateSandboxBody {
            cpu: resources.cpu,
            memory_gb: resources.memory_gb,
            disk_gb: resources.disk_gb,
            labels: labels.clone(),
        };

        let response = self
            .client
            .post(self.url("/v1/sandboxes"))
            .timeout(LIFECYCLE_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ProviderError::Unauthorized(text)
                }
                _ => ProviderError::CreateFailed(format!("{status}: {text}")),
            });
        }

        let dto: SandboxDto = response.json().await?;
        Ok(dto.into())
    }

    async fn get(&self, id: &str) -> ProviderResult<Sandbox> {
        let response = self
            .client
            .get(self.url(&format!("/v1/sandboxes/{id}")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(Some(id), response).await);
        }

        let dto: SandboxDto = response.json().await?;
        Ok(dto.into())
    }

    async fn start(&self, id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/sandboxes/{id}/start")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::fail(Some(id), response).await;
            return Err(match err {
                ProviderError::InvalidResponse(message) => ProviderError::StartFailed {
                    id: id.to_string(),
                    message,
                },
                other => other,
            });
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/sandboxes/{id}/stop")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::fail(Some(id), response).await;
            return Err(match err {
                ProviderError::InvalidResponse(message) => ProviderError::StopFailed {
                    id: id.to_string(),
                    message,
                },
                other => other,
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/sandboxes/{id}")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::fail(Some(id), response).await;
            return Err(match err {
                ProviderError::InvalidResponse(message) => ProviderError::DeleteFailed {
                    id: id.to_string(),
                    message,
                },
                other => other,
            });
        }
        Ok(())
    }

    async fn list(
        &self,
        labels: Option<&HashMap<String, String>>,
    ) -> ProviderResult<Vec<Sandbox>> {
        let mut request = self
            .client
            .get(self.url("/v1/sandboxes"))
            .timeout(LIFECYCLE_TIMEOUT);

        if let Some(labels) = labels {
            for (key, value) in labels {
                request = request.query(&[("label", format!("{key}={value}"))]);
            }
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(None, response).await);
        }

        let dtos: Vec<SandboxDto> = response.json().await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn set_labels(&self, id: &str, labels: &HashMap<String, String>) -> ProviderResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/v1/sandboxes/{id}/labels")))
            .timeout(LIFECYCLE_TIMEOUT)
            .json(labels)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(Some(id), response).await);
        }
        Ok(())
    }

    async fn root_dir(&self, id: &str) -> ProviderResult<PathBuf> {
        let response = self
            .client
            .get(self.url(&format!("/v1/sandboxes/{id}/workdir")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let dto: WorkdirDto = response.json().await?;
                Ok(PathBuf::from(dto.path))
            }
            StatusCode::CONFLICT => Err(ProviderError::RootDirUnavailable(id.to_string())),
            _ => Err(Self::fail(Some(id), response).await),
        }
    }

    async fn exec(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> ProviderResult<ExecOutput> {
        let body = ExecBody {
            command: command.to_string(),
            cwd: cwd.map(|p| p.to_string_lossy().into_owned()),
            timeout_secs: timeout.as_secs(),
        };

        let request = self
            .client
            .post(self.url(&format!("/v1/sandboxes/{id}/exec")))
            .timeout(timeout + EXEC_TIMEOUT_SLACK)
            .json(&body);

        // The client-side timeout is the authoritative bound: a provider
        // that never answers must surface as Timeout, not a hang.
        let response = match tokio::time::timeout(timeout + EXEC_TIMEOUT_SLACK, request.send())
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout(timeout)),
        };

        match response.status() {
            status if status.is_success() => {
                let dto: ExecDto = response.json().await?;
                Ok(ExecOutput::from_parts(dto.stdout, dto.stderr, dto.exit_code))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(ProviderError::Timeout(timeout))
            }
            _ => {
                let err = Self::fail(Some(id), response).await;
                Err(match err {
                    ProviderError::InvalidResponse(message) => ProviderError::ExecFailed(message),
                    other => other,
                })
            }
        }
    }

    async fn preview_url(&self, id: &str, port: u16) -> ProviderResult<String> {
        let response = self
            .client
            .get(self.url(&format!("/v1/sandboxes/{id}/ports/{port}/preview")))
            .timeout(LIFECYCLE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let dto: PreviewDto = response.json().await?;
                Ok(dto.url)
            }
            StatusCode::NOT_FOUND => Err(ProviderError::PreviewUnavailable {
                id: id.to_string(),
                port,
            }),
            _ => Err(Self::fail(Some(id), response).await),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSandboxBody {
    cpu: u32,
    memory_gb: u32,
    disk_gb: u32,
    labels: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ExecBody {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SandboxDto {
    id: String,
    state: String,
    created_at: DateTime<Utc>,
    cpu: u32,
    memory_gb: u32,
    disk_gb: u32,
    #[serde(default)]
    labels: HashMap<String, String>,
}

impl From<SandboxDto> for Sandbox {
    fn from(dto: SandboxDto) -> Self {
        Sandbox {
            id: dto.id,
            state: parse_state(&dto.state),
            created_at: dto.created_at,
            resources: ResourceSpec {
                cpu: dto.cpu,
                memory_gb: dto.memory_gb,
                disk_gb: dto.disk_gb,
            },
            labels: dto.labels,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkdirDto {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ExecDto {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct PreviewDto {
    url: String,
}

/// Map a provider state string onto our enum, falling back to Unknown for
/// states introduced after this client was written.
fn parse_state(state: &str) -> SandboxState {
    match state {
        "pending" => SandboxState::Pending,
        "starting" => SandboxState::Starting,
        "started" | "running" => SandboxState::Started,
        "stopping" => SandboxState::Stopping,
        "stopped" => SandboxState::Stopped,
        "error" => SandboxState::Error,
        _ => SandboxState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("started"), SandboxState::Started);
        assert_eq!(parse_state("running"), SandboxState::Started);
        assert_eq!(parse_state("stopped"), SandboxState::Stopped);
        assert_eq!(parse_state("hibernated"), SandboxState::Unknown);
    }

    #[test]
    fn test_base_url_trimmed() {
        let provider = HttpProvider::new("https://api.example.dev/", "key").unwrap();
        assert_eq!(provider.url("/v1/sandboxes"), "https://api.example.dev/v1/sandboxes");
    }
}
