//! Centralized configuration for the model store.
//!
//! Compile-time defaults live as associated constants; the runtime-tunable
//! subset is carried by [`Settings`], which is persisted as `settings.json`
//! under the storage root.

use crate::error::Result;
use crate::metadata::{atomic_read_json, atomic_write_json};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Storage quota and cleanup defaults.
pub struct StorageConfig;

impl StorageConfig {
    /// Device usage ratio that raises a warning alert.
    pub const DEVICE_WARNING_RATIO: f64 = 0.90;
    /// Device usage ratio that raises a critical alert.
    pub const DEVICE_CRITICAL_RATIO: f64 = 0.95;
    /// Share of the device that models may occupy before an alert.
    pub const MODEL_SHARE_RATIO: f64 = 0.20;
    /// Absolute cache size ceiling (2 GiB).
    pub const CACHE_CEILING_BYTES: u64 = 2 * 1024 * 1024 * 1024;
    /// Identical alerts inside this window are recorded but not delivered.
    pub const ALERT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(5 * 60);
    /// Maximum number of alerts kept for de-duplication.
    pub const ALERT_HISTORY_LIMIT: usize = 100;
    /// Files older than this are eligible for cache cleanup (7 days).
    pub const CACHE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    /// Free space must reach `required * DOWNLOAD_SPACE_FACTOR` before a download starts.
    pub const DOWNLOAD_SPACE_FACTOR: f64 = 1.1;
    /// Expected compressed size as a fraction of the unpacked size.
    pub const COMPRESSION_RATIO: f64 = 0.7;
    /// Safety margin applied on top of the required storage estimate.
    pub const SAFETY_MARGIN: f64 = 0.2;
}

/// Validation defaults.
pub struct ValidationConfig;

impl ValidationConfig {
    /// Supported GGUF versions (inclusive).
    pub const GGUF_MIN_VERSION: u32 = 2;
    pub const GGUF_MAX_VERSION: u32 = 3;
    /// Upper bound on GGUF tensor counts before the header is considered corrupt.
    pub const GGUF_MAX_TENSORS: u64 = 100_000;
    /// Minimum size of a protobuf graph file.
    pub const ONNX_MIN_SIZE: u64 = 8;
    /// Window searched for the ONNX textual marker.
    pub const ONNX_MARKER_WINDOW: usize = 4096;
    /// Upper bound on a safetensors JSON header.
    pub const SAFETENSORS_MAX_HEADER: u64 = 100_000_000;
    /// Largest shard count a `-of-NNNNN` file name may declare.
    pub const MAX_SHARDS: usize = 10_000;
    /// Missing shard names listed in one verdict; the rest are counted.
    pub const MAX_REPORTED_MISSING: usize = 32;
    /// Installed size may differ from the declared size by this fraction.
    pub const INSTALL_SIZE_TOLERANCE: f64 = 0.01;
}

/// Download defaults.
pub struct DownloadConfig;

impl DownloadConfig {
    pub const TEMP_SUFFIX: &'static str = "tmp";
    pub const PARTIAL_SUFFIX: &'static str = "partial";
    pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// A tracked partial download untouched for this long is considered stale.
    pub const PARTIAL_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
}

/// Background storage monitor defaults.
pub struct MonitorConfig;

impl MonitorConfig {
    pub const INTERVAL: Duration = Duration::from_secs(30);
}

/// Directory names under the storage root.
pub struct PathsConfig;

impl PathsConfig {
    pub const DOWNLOADS_DIR_NAME: &'static str = "Downloads";
    pub const TEMP_DIR_NAME: &'static str = "Temp";
    pub const MODELS_DIR_NAME: &'static str = "Models";
    pub const CACHE_DIR_NAME: &'static str = "Cache";
    pub const EXTRACT_DIR_NAME: &'static str = "Extracted";
    pub const METADATA_FILENAME: &'static str = "metadata.json";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
}

/// Runtime-tunable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device_warning_ratio: f64,
    pub device_critical_ratio: f64,
    pub model_share_ratio: f64,
    pub cache_ceiling_bytes: u64,
    pub alert_suppression_secs: u64,
    pub cache_retention_secs: u64,
    pub monitor_interval_secs: u64,
    pub partial_stale_secs: u64,
    pub install_size_tolerance: f64,
    /// Free-space target for the monitor's automatic cleanup; `None` disables it.
    pub auto_cleanup_target_bytes: Option<u64>,
    /// When true, automatic cleanup never escalates to a full cache clear.
    pub preserve_recent: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_warning_ratio: StorageConfig::DEVICE_WARNING_RATIO,
            device_critical_ratio: StorageConfig::DEVICE_CRITICAL_RATIO,
            model_share_ratio: StorageConfig::MODEL_SHARE_RATIO,
            cache_ceiling_bytes: StorageConfig::CACHE_CEILING_BYTES,
            alert_suppression_secs: StorageConfig::ALERT_SUPPRESSION_WINDOW.as_secs(),
            cache_retention_secs: StorageConfig::CACHE_RETENTION.as_secs(),
            monitor_interval_secs: MonitorConfig::INTERVAL.as_secs(),
            partial_stale_secs: DownloadConfig::PARTIAL_STALE_AFTER.as_secs(),
            install_size_tolerance: ValidationConfig::INSTALL_SIZE_TOLERANCE,
            auto_cleanup_target_bytes: None,
            preserve_recent: true,
        }
    }
}

impl Settings {
    /// Load settings from `{root}/settings.json`, falling back to defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PathsConfig::SETTINGS_FILENAME);
        Ok(atomic_read_json::<Settings>(&path)?.unwrap_or_default())
    }

    /// Persist settings to `{root}/settings.json`.
    pub fn save(&self, root: &Path) -> Result<()> {
        atomic_write_json(&root.join(PathsConfig::SETTINGS_FILENAME), self, true)
    }

    pub fn alert_suppression_window(&self) -> Duration {
        Duration::from_secs(self.alert_suppression_secs)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn partial_stale_after(&self) -> Duration {
        Duration::from_secs(self.partial_stale_secs)
    }
}
