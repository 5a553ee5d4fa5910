//! Error types for provider operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the sandbox provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected a sandbox creation request (quota, invalid spec)
    #[error("failed to create sandbox: {0}")]
    CreateFailed(String),

    /// Sandbox id unknown to the provider
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Failed to start a sandbox
    #[error("failed to start sandbox '{id}': {message}")]
    StartFailed { id: String, message: String },

    /// Failed to stop a sandbox
    #[error("failed to stop sandbox '{id}': {message}")]
    StopFailed { id: String, message: String },

    /// Failed to delete a sandbox
    #[error("failed to delete sandbox '{id}': {message}")]
    DeleteFailed { id: String, message: String },

    /// Remote command execution failed before producing an exit code
    #[error("command execution failed: {0}")]
    ExecFailed(String),

    /// Remote operation timed out
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Root directory cannot be resolved (sandbox not started)
    #[error("root directory unavailable for sandbox '{0}'")]
    RootDirUnavailable(String),

    /// No preview URL available for the given port
    #[error("no preview URL for sandbox '{id}' port {port}")]
    PreviewUnavailable { id: String, port: u16 },

    /// Credential rejected by the provider
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP transport error
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned a payload we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
