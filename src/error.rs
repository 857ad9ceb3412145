//! Error types for each stage of the ingestion pipeline.
//!
//! Only [`IngestError`] ends a run early. Everything raised while handling a
//! single article is logged by the orchestrator and the batch moves on.

use std::time::Duration;
use thiserror::Error;

/// Failure to obtain rendered HTML for a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}

/// Failure talking to the external text-classification service.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no API key configured for the classification service")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classification service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("classification service returned no choices")]
    EmptyReply,
}

impl ClassifyError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifyError::Http(_) => true,
            ClassifyError::Status { status, .. } => *status == 429 || *status >= 500,
            ClassifyError::MissingApiKey | ClassifyError::EmptyReply => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that abort a whole orchestration run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("lock file error: {0}")]
    Lock(std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("job '{0}' has a zero interval")]
    ZeroInterval(String),

    #[error("scheduler already started")]
    AlreadyStarted,
}
