//! Storage usage snapshots. A snapshot is never updated in place; the
//! analyzer produces a new one each pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Space used by the store's own directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStorage {
    pub total_size: u64,
    pub downloads_size: u64,
    pub temp_size: u64,
    pub models_size: u64,
    pub cache_size: u64,
}

/// Capacity of the volume holding the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStorage {
    pub total_space: u64,
    pub free_space: u64,
    pub used_space: u64,
}

impl DeviceStorage {
    pub fn usage_ratio(&self) -> f64 {
        if self.total_space == 0 {
            return 0.0;
        }
        self.used_space as f64 / self.total_space as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUsage {
    pub total_size: u64,
    pub model_count: usize,
}

/// Installed models, in aggregate and per backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStorage {
    pub total_size: u64,
    pub model_count: usize,
    pub average_size: u64,
    pub by_backend: BTreeMap<String, BackendUsage>,
}

/// One installed model as seen by storage accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredModel {
    pub id: String,
    pub name: String,
    /// First compatible backend, `"unassigned"` when none was declared.
    pub backend: String,
    pub size: u64,
    pub path: PathBuf,
    pub installed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub app: AppStorage,
    pub device: DeviceStorage,
    pub models: ModelStorage,
    pub cache_size: u64,
    pub stored_models: Vec<StoredModel>,
    pub measured_at: DateTime<Utc>,
}

impl StorageInfo {
    /// `models.total_size <= app.total_size <= device.used_space`
    pub fn reconciles(&self) -> bool {
        self.models.total_size <= self.app.total_size && self.app.total_size <= self.device.used_space
    }

    /// Fraction of the device occupied by installed models.
    pub fn model_share_ratio(&self) -> f64 {
        if self.device.total_space == 0 {
            return 0.0;
        }
        self.models.total_size as f64 / self.device.total_space as f64
    }
}
