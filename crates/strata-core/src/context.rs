//! Shared components for one storage root.
//!
//! A [`ModelContext`] is built once and handed to every session by `Arc`.
//! Nothing in the crate reads global state; registries and host probes all
//! arrive through the builder.

use crate::config::Settings;
use crate::error::{Result, StrataError};
use crate::install::Installer;
use crate::platform::{DiskProbe, Fs2DiskProbe, HostProbe, SysinfoHost};
use crate::registry::{BackendRegistry, RuntimeRegistry, TokenizerRegistry};
use crate::storage::{
    AlertManager, DownloadStorage, StorageAnalyzer, StorageCleaner, StorageMonitor, StoragePaths,
};
use crate::validation::formats::ValidatorTable;
use crate::validation::{DependencyChecker, HeaderMetadataExtractor, ValidationCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything a model session needs, wired for one storage root.
pub struct ModelContext {
    pub paths: StoragePaths,
    pub settings: Settings,
    pub backends: Arc<BackendRegistry>,
    pub tokenizers: Arc<TokenizerRegistry>,
    pub runtimes: Arc<RuntimeRegistry>,
    pub disk: Arc<dyn DiskProbe>,
    pub host: Arc<dyn HostProbe>,
    pub downloads: Arc<DownloadStorage>,
    pub installer: Arc<Installer>,
    pub validator: Arc<ValidationCoordinator>,
    pub analyzer: Arc<StorageAnalyzer>,
    pub cleaner: Arc<StorageCleaner>,
    pub alerts: Arc<AlertManager>,
}

impl ModelContext {
    pub fn builder(root: impl Into<PathBuf>) -> ModelContextBuilder {
        ModelContextBuilder::new(root)
    }

    /// A monitor over this context's analyzer, alerts and cleaner.
    pub fn storage_monitor(&self) -> StorageMonitor {
        StorageMonitor::new(
            Arc::clone(&self.analyzer),
            Arc::clone(&self.alerts),
            Arc::clone(&self.cleaner),
            self.settings.clone(),
        )
    }
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("root", &self.paths.root())
            .field("settings", &self.settings)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ModelContext`].
///
/// # Example
///
/// ```rust,no_run
/// use strata_core::ModelContext;
///
/// let context = ModelContext::builder("./models-root")
///     .auto_create_dirs(true)
///     .build()?;
/// # Ok::<(), strata_core::StrataError>(())
/// ```
pub struct ModelContextBuilder {
    root: PathBuf,
    auto_create_dirs: bool,
    settings: Option<Settings>,
    backends: BackendRegistry,
    tokenizers: TokenizerRegistry,
    runtimes: RuntimeRegistry,
    disk: Option<Arc<dyn DiskProbe>>,
    host: Option<Arc<dyn HostProbe>>,
}

impl ModelContextBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            auto_create_dirs: false,
            settings: None,
            backends: BackendRegistry::new(),
            tokenizers: TokenizerRegistry::new(),
            runtimes: RuntimeRegistry::new(),
            disk: None,
            host: None,
        }
    }

    /// Create the storage layout if it is missing.
    ///
    /// Default: `false` (the root must already exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Use these settings instead of `settings.json` under the root.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn backends(mut self, registry: BackendRegistry) -> Self {
        self.backends = registry;
        self
    }

    pub fn tokenizers(mut self, registry: TokenizerRegistry) -> Self {
        self.tokenizers = registry;
        self
    }

    pub fn runtimes(mut self, registry: RuntimeRegistry) -> Self {
        self.runtimes = registry;
        self
    }

    /// Default: [`Fs2DiskProbe`]
    pub fn disk_probe(mut self, probe: Arc<dyn DiskProbe>) -> Self {
        self.disk = Some(probe);
        self
    }

    /// Default: [`SysinfoHost`]
    pub fn host_probe(mut self, probe: Arc<dyn HostProbe>) -> Self {
        self.host = Some(probe);
        self
    }

    pub fn build(self) -> Result<ModelContext> {
        let paths = StoragePaths::new(self.root);
        if self.auto_create_dirs {
            paths.create_all()?;
        } else if !paths.root().is_dir() {
            return Err(StrataError::Config {
                message: format!("Storage root does not exist: {}", paths.root().display()),
            });
        }

        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::load(paths.root())?,
        };
        let disk = self.disk.unwrap_or_else(|| Arc::new(Fs2DiskProbe));
        let host = self.host.unwrap_or_else(|| Arc::new(SysinfoHost));
        let backends = Arc::new(self.backends);
        let tokenizers = Arc::new(self.tokenizers);
        let runtimes = Arc::new(self.runtimes);

        let downloads = Arc::new(DownloadStorage::new(
            paths.clone(),
            Arc::clone(&disk),
            settings.partial_stale_after(),
        ));
        let installer = Arc::new(Installer::new(paths.clone(), settings.install_size_tolerance));
        let validator = Arc::new(ValidationCoordinator::new(
            ValidatorTable::with_defaults(runtimes.get()),
            DependencyChecker::new(Arc::clone(&backends), Arc::clone(&tokenizers), paths.models_dir()),
            Arc::new(HeaderMetadataExtractor),
            Arc::clone(&host),
        ));
        let analyzer = Arc::new(StorageAnalyzer::new(paths.clone(), Arc::clone(&disk)));
        let cleaner = Arc::new(StorageCleaner::new(
            paths.clone(),
            Arc::clone(&disk),
            Arc::clone(&downloads),
            settings.cache_retention(),
        ));
        let alerts = Arc::new(AlertManager::from_settings(&settings));

        info!(
            root = %paths.root().display(),
            backends = backends.keys().len(),
            "Model context ready"
        );
        Ok(ModelContext {
            paths,
            settings,
            backends,
            tokenizers,
            runtimes,
            disk,
            host,
            downloads,
            installer,
            validator,
            analyzer,
            cleaner,
            alerts,
        })
    }
}
