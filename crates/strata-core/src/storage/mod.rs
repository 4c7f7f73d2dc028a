//! On-disk layout, usage analysis, quota alerts, cleanup and the download
//! staging area.

mod alerts;
mod analyzer;
mod cleaner;
mod download;
mod extract;
mod info;
mod monitor;
mod paths;

pub use alerts::{
    AlertDispatch, AlertHandle, AlertManager, AlertSeverity, AlertThresholds, AlertType, StorageAlert,
};
pub use analyzer::{
    artifact_size, average_model_size, directory_size, estimate_download_size,
    required_storage_with_margin, size_by_backend, size_by_extension, StorageAnalyzer,
    UNASSIGNED_BACKEND,
};
pub use cleaner::{CleanupReport, CleanupStage, StorageCleaner};
pub use download::{DownloadStorage, PartialDownload};
pub use extract::{extract_archive, ArchiveKind};
pub use info::{AppStorage, BackendUsage, DeviceStorage, ModelStorage, StorageInfo, StoredModel};
pub use monitor::{MonitorTick, StorageMonitor};
pub use paths::StoragePaths;
