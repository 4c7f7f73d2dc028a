//! Error types for the strata model store.
//!
//! Each failure domain has its own enum so callers can match on exactly the
//! failures an operation can produce. `StrataError` wraps all of them for the
//! public API surface.

use crate::lifecycle::LifecycleState;
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle state machine failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Model {model_id} has no passing validation verdict for its installed path")]
    NotValidated { model_id: String },

    #[error("Model {model_id} is not a local model and must be downloaded")]
    NotLocal { model_id: String },
}

/// Download failures surfaced to the caller of a download operation.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Model has no download URL")]
    NoUrl,

    #[error("Model {model_id} is local and is never downloaded")]
    LocalModel { model_id: String },

    #[error("Model {model_id} is already downloading")]
    AlreadyDownloading { model_id: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("File system error at {path:?}: {message}")]
    FileSystem {
        message: String,
        path: Option<PathBuf>,
    },
}

/// Storage subsystem failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Insufficient storage: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid archive {path:?}: {message}")]
    InvalidArchive { path: PathBuf, message: String },
}

/// Main error type for the strata crates.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Model not found: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("Invalid model id: {model_id:?}")]
    InvalidModelId { model_id: String },

    #[error("Installation of {model_id} failed: {reason}")]
    ExtractionFailed { model_id: String, reason: String },

    #[error("Model {model_id} failed validation with {error_count} error(s)")]
    ValidationFailed { model_id: String, error_count: usize },

    #[error("No registered execution backend for model {model_id}")]
    BackendUnavailable { model_id: String },

    #[error("Backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        StrataError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network {
            message: err.to_string(),
        }
    }
}

impl StrataError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        StrataError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error is worth retrying from the transport layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Download(DownloadError::Network { .. }))
    }
}

impl StorageError {
    /// Create a storage IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        StorageError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}

impl DownloadError {
    pub fn file_system(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DownloadError::FileSystem {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }
}
