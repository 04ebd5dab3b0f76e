//! Error types for deployd

use thiserror::Error;

/// Main error type for deployd
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Network or timeout failure talking to the CI service or blob storage
    #[error("Transport error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Non-success HTTP status from the CI service
    #[error("CI API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Unexpected but well-formed response (missing redirect, empty body, ...)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Filesystem walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    /// Another deployment owns the deployment lock
    #[error("Deployment #{0} is in progress")]
    LockHeld(u64),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Deployment error: {0}")]
    DeployFailed(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::Internal(format!("blocking task failed: {}", err))
    }
}
