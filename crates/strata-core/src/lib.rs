//! Strata Core - lifecycle, validation and storage management for on-device
//! model artifacts.
//!
//! A model moves from discovery through download, extraction, validation,
//! installation and loading into an execution backend. Every artifact is
//! checked (format fingerprint, checksum, structure, companions, host
//! requirements) before anything may execute it, and the storage root is
//! watched for quota pressure.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_core::{
//!     CancellationToken, HttpFetcher, ModelContext, ModelDescriptor, ModelFormat, ModelSession,
//! };
//!
//! # async fn run() -> strata_core::Result<()> {
//! let context = Arc::new(ModelContext::builder("/var/lib/strata").auto_create_dirs(true).build()?);
//!
//! let descriptor = ModelDescriptor {
//!     download_url: Some("https://example.com/tiny.Q4_K_M.gguf".into()),
//!     ..ModelDescriptor::new("org/tiny", "Tiny", ModelFormat::Gguf)
//! };
//! let session = ModelSession::new(descriptor, context);
//! session.discover()?;
//! session
//!     .download(Arc::new(HttpFetcher::new()?), &CancellationToken::new(), None)
//!     .await?;
//! let verdict = session.install_and_validate(false).await?;
//! println!("valid: {}, warnings: {}", verdict.is_valid, verdict.warnings.len());
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod install;
pub mod lifecycle;
pub mod metadata;
pub mod models;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod validation;

mod context;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::Settings;
pub use context::{ModelContext, ModelContextBuilder};
pub use download::{DownloadProgress, Fetcher, HttpFetcher, ModelDownloader};
pub use error::{DownloadError, LifecycleError, Result, StorageError, StrataError};
pub use install::{InstallRecord, Installer};
pub use lifecycle::{LifecycleState, LifecycleStateMachine, ModelSession};
pub use models::{ExpectedChecksum, HardwareRequirements, Modality, ModelDescriptor, ModelFormat};
pub use platform::{DiskProbe, DiskSpace, Fs2DiskProbe, HostProbe, SysinfoHost};
pub use registry::{BackendRegistry, ExecutionBackend, RuntimeRegistry, TokenizerRegistry};
pub use storage::{
    AlertManager, CleanupReport, StorageAlert, StorageAnalyzer, StorageCleaner, StorageInfo,
    StorageMonitor, StoragePaths,
};
pub use validation::{
    ChecksumAlgorithm, ChecksumValidator, FormatDetector, ValidationCoordinator, ValidationError,
    ValidationVerdict, ValidationWarning,
};
