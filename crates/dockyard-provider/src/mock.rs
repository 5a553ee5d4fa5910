//! Mock provider for testing.

use crate::{
    error::{ProviderError, ProviderResult},
    ExecOutput, ResourceSpec, Sandbox, SandboxProvider, SandboxState,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted reaction to an exec call.
#[derive(Debug, Clone)]
pub enum MockExec {
    /// Return this output.
    Output(ExecOutput),
    /// Fail with `ProviderError::ExecFailed`.
    Error(String),
    /// Fail with `ProviderError::Timeout`.
    Timeout,
}

#[derive(Default)]
struct Inner {
    sandboxes: HashMap<String, Sandbox>,
    /// Consumed in FIFO order, each rule at most once.
    queued: Vec<(String, MockExec)>,
    /// Persistent rules, first match wins.
    stubs: Vec<(String, MockExec)>,
    exec_log: Vec<String>,
    fail_create: Option<String>,
    next_id: usize,
}

/// In-memory provider for tests and offline development.
///
/// Commands not matched by any scripted rule succeed with empty output, so
/// tests only script the calls they care about.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MockProvider {
    /// Create a new mock provider with no sandboxes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot exec rule: the next command containing `pattern`
    /// gets `reaction`.
    pub fn expect_exec(&self, pattern: impl Into<String>, reaction: MockExec) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued.push((pattern.into(), reaction));
    }

    /// Add a persistent exec rule for every command containing `pattern`.
    pub fn stub_exec(&self, pattern: impl Into<String>, reaction: MockExec) {
        let mut inner = self.inner.lock().unwrap();
        inner.stubs.push((pattern.into(), reaction));
    }

    /// Make the next `create` call fail.
    pub fn fail_create(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create = Some(message.into());
    }

    /// Insert a sandbox record directly (for list/status tests).
    pub fn insert_sandbox(&self, sandbox: Sandbox) {
        let mut inner = self.inner.lock().unwrap();
        inner.sandboxes.insert(sandbox.id.clone(), sandbox);
    }

    /// All commands executed so far, in order.
    pub fn exec_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().exec_log.clone()
    }

    /// Number of executed commands containing `pattern`.
    pub fn exec_count_matching(&self, pattern: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .exec_log
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn lookup(inner: &Inner, id: &str) -> ProviderResult<Sandbox> {
        inner
            .sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create(
        &self,
        resources: &ResourceSpec,
        labels: &HashMap<String, String>,
    ) -> ProviderResult<Sandbox> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.fail_create.take() {
            return Err(ProviderError::CreateFailed(message));
        }

        inner.next_id += 1;
        let sandbox = Sandbox {
            id: format!("sbx-{}", inner.next_id),
            state: SandboxState::Pending,
            created_at: Utc::now(),
            resources: *resources,
            labels: labels.clone(),
        };
        inner.sandboxes.insert(sandbox.id.clone(), sandbox.clone());
        Ok(sandbox)
    }

    async fn get(&self, id: &str) -> ProviderResult<Sandbox> {
        let inner = self.inner.lock().unwrap();
        Self::lookup(&inner, id)
    }

    async fn start(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sandboxes.get_mut(id) {
            Some(sandbox) => {
                sandbox.state = SandboxState::Started;
                Ok(())
            }
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn stop(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sandboxes.get_mut(id) {
            Some(sandbox) => {
                sandbox.state = SandboxState::Stopped;
                Ok(())
            }
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sandboxes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn list(
        &self,
        labels: Option<&HashMap<String, String>>,
    ) -> ProviderResult<Vec<Sandbox>> {
        let inner = self.inner.lock().unwrap();
        let matches = |sandbox: &Sandbox| match labels {
            Some(wanted) => wanted
                .iter()
                .all(|(k, v)| sandbox.labels.get(k) == Some(v)),
            None => true,
        };
        Ok(inner.sandboxes.values().filter(|s| matches(s)).cloned().collect())
    }

    async fn set_labels(&self, id: &str, labels: &HashMap<String, String>) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sandboxes.get_mut(id) {
            Some(sandbox) => {
                sandbox.labels = labels.clone();
                Ok(())
            }
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn root_dir(&self, id: &str) -> ProviderResult<PathBuf> {
        let inner = self.inner.lock().unwrap();
        let sandbox = Self::lookup(&inner, id)?;
        if sandbox.state != SandboxState::Started {
            return Err(ProviderError::RootDirUnavailable(id.to_string()));
        }
        Ok(PathBuf::from("/home/user"))
    }

    async fn exec(
        &self,
        id: &str,
        command: &str,
        _cwd: Option<&Path>,
        timeout: Duration,
    ) -> ProviderResult<ExecOutput> {
        let reaction = {
            let mut inner = self.inner.lock().unwrap();
            Self::lookup(&inner, id)?;
            inner.exec_log.push(command.to_string());

            if let Some(pos) = inner
                .queued
                .iter()
                .position(|(pattern, _)| command.contains(pattern.as_str()))
            {
                inner.queued.remove(pos).1
            } else if let Some((_, reaction)) = inner
                .stubs
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
            {
                reaction.clone()
            } else {
                MockExec::Output(ExecOutput::success(""))
            }
        };

        match reaction {
            MockExec::Output(output) => Ok(output),
            MockExec::Error(message) => Err(ProviderError::ExecFailed(message)),
            MockExec::Timeout => Err(ProviderError::Timeout(timeout)),
        }
    }

    async fn preview_url(&self, id: &str, port: u16) -> ProviderResult<String> {
        let inner = self.inner.lock().unwrap();
        Self::lookup(&inner, id)?;
        Ok(format!("https://{port}-{id}.preview.mock.dev"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lifecycle() {
        let provider = MockProvider::new();
        let sandbox = provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(sandbox.state, SandboxState::Pending);

        provider.start(&sandbox.id).await.unwrap();
        assert_eq!(
            provider.get(&sandbox.id).await.unwrap().state,
            SandboxState::Started
        );

        provider.stop(&sandbox.id).await.unwrap();
        provider.delete(&sandbox.id).await.unwrap();
        assert!(provider.get(&sandbox.id).await.is_err());
    }

    #[tokio::test]
    async fn test_root_dir_requires_started() {
        let provider = MockProvider::new();
        let sandbox = provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();

        assert!(matches!(
            provider.root_dir(&sandbox.id).await,
            Err(ProviderError::RootDirUnavailable(_))
        ));

        provider.start(&sandbox.id).await.unwrap();
        assert_eq!(
            provider.root_dir(&sandbox.id).await.unwrap(),
            PathBuf::from("/home/user")
        );
    }

    #[tokio::test]
    async fn test_scripted_exec_consumed_in_order() {
        let provider = MockProvider::new();
        let sandbox = provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();
        provider.start(&sandbox.id).await.unwrap();

        provider.expect_exec("curl", MockExec::Output(ExecOutput::failure(7, "refused")));
        provider.expect_exec("curl", MockExec::Output(ExecOutput::success("200")));

        let first = provider
            .exec(&sandbox.id, "curl localhost:8080", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!first.success);

        let second = provider
            .exec(&sandbox.id, "curl localhost:8080", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.success);

        // Unscripted commands default to success.
        let third = provider
            .exec(&sandbox.id, "echo hi", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(third.success);
        assert_eq!(provider.exec_count_matching("curl"), 2);
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let provider = MockProvider::new();
        let labels: HashMap<String, String> =
            [("owner".to_string(), "alice".to_string())].into();
        provider.create(&ResourceSpec::default(), &labels).await.unwrap();
        provider
            .create(&ResourceSpec::default(), &HashMap::new())
            .await
            .unwrap();

        let all = provider.list(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = provider.list(Some(&labels)).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
