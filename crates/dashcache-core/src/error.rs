//! Error types shared across the cache and session subsystems.

use std::sync::Arc;

use thiserror::Error;

/// A fetch function failed, or its task never produced a result.
///
/// Clone is required because one failure is delivered to every caller
/// coalesced onto the same in-flight fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Fetch failed for {key}: {cause:#}")]
    Failed {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Fetch for {key} was aborted before completing")]
    Aborted { key: String },
}

impl FetchError {
    pub fn failed(key: &str, source: anyhow::Error) -> Self {
        FetchError::Failed {
            key: key.to_string(),
            cause: Arc::new(source),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            FetchError::Failed { key, .. } | FetchError::Aborted { key } => key,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PrefetchError {
    #[error("No fetch function registered for {0}")]
    Unregistered(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Session storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Persisted session table rejected: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
