//! Storage usage analysis and space estimates.

use super::info::{AppStorage, BackendUsage, DeviceStorage, ModelStorage, StorageInfo, StoredModel};
use super::paths::StoragePaths;
use crate::config::StorageConfig;
use crate::error::Result;
use crate::install::load_inventory;
use crate::platform::DiskProbe;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Backend bucket for models that declared none.
pub const UNASSIGNED_BACKEND: &str = "unassigned";

/// Sum of file sizes under `path` (or the file's own size).
pub fn artifact_size(path: &Path) -> u64 {
    match path.metadata() {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => directory_size(path),
        Err(_) => 0,
    }
}

/// Recursive size of every non-directory entry under `dir`. Missing → 0.
pub fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Size of files under `dir` whose extension is in `extensions` (case-insensitive).
pub fn size_by_extension(dir: &Path, extensions: &[&str]) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.iter().any(|want| want.eq_ignore_ascii_case(x)))
        })
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Aggregate size and count per backend.
pub fn size_by_backend(models: &[StoredModel]) -> BTreeMap<String, BackendUsage> {
    let mut usage: BTreeMap<String, BackendUsage> = BTreeMap::new();
    for model in models {
        let entry = usage.entry(model.backend.clone()).or_default();
        entry.total_size += model.size;
        entry.model_count += 1;
    }
    usage
}

pub fn average_model_size(models: &[StoredModel]) -> u64 {
    if models.is_empty() {
        return 0;
    }
    models.iter().map(|m| m.size).sum::<u64>() / models.len() as u64
}

/// Expected transfer size of an artifact that unpacks to `unpacked_size`.
pub fn estimate_download_size(unpacked_size: u64) -> u64 {
    (unpacked_size as f64 * StorageConfig::COMPRESSION_RATIO).round() as u64
}

/// Space to reserve for an artifact: doubled while an archive and its
/// extracted copy coexist, then padded by the safety margin.
pub fn required_storage_with_margin(size: u64, needs_extraction: bool) -> u64 {
    let base = if needs_extraction { size.saturating_mul(2) } else { size };
    (base as f64 * (1.0 + StorageConfig::SAFETY_MARGIN)).ceil() as u64
}

/// Produces [`StorageInfo`] snapshots for a storage root.
#[derive(Clone)]
pub struct StorageAnalyzer {
    paths: StoragePaths,
    disk: Arc<dyn DiskProbe>,
}

impl StorageAnalyzer {
    pub fn new(paths: StoragePaths, disk: Arc<dyn DiskProbe>) -> Self {
        Self { paths, disk }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Installed models from their sidecar records.
    pub fn stored_models(&self) -> Vec<StoredModel> {
        load_inventory(&self.paths.models_dir())
            .into_iter()
            .map(|record| StoredModel {
                size: if record.installed_path.exists() {
                    artifact_size(&record.installed_path)
                } else {
                    record.size_bytes
                },
                backend: record
                    .backend
                    .unwrap_or_else(|| UNASSIGNED_BACKEND.to_string()),
                id: record.id,
                name: record.name,
                path: record.installed_path,
                installed_at: Some(record.install_date),
            })
            .collect()
    }

    /// Free bytes on the storage volume.
    pub fn available_space(&self) -> Result<u64> {
        Ok(self.disk.space(self.paths.root())?.available)
    }

    /// Measure everything. Blocking; run it off the async executor.
    pub fn analyze(&self) -> Result<StorageInfo> {
        let space = self.disk.space(self.paths.root())?;

        let downloads_total = directory_size(&self.paths.downloads_dir());
        let temp_size = directory_size(&self.paths.temp_dir());
        let extract_size = directory_size(&self.paths.extract_dir());
        let cache_size = directory_size(&self.paths.cache_dir()) + extract_size;
        let models_size = directory_size(&self.paths.models_dir());
        let downloads_size = downloads_total.saturating_sub(temp_size + extract_size);

        let app = AppStorage {
            total_size: downloads_size + temp_size + models_size + cache_size,
            downloads_size,
            temp_size,
            models_size,
            cache_size,
        };

        let stored_models = self.stored_models();
        // Records can point outside Models/; clamp so the totals still nest.
        let models_total = stored_models
            .iter()
            .map(|m| m.size)
            .sum::<u64>()
            .min(app.total_size);
        let models = ModelStorage {
            total_size: models_total,
            model_count: stored_models.len(),
            average_size: average_model_size(&stored_models),
            by_backend: size_by_backend(&stored_models),
        };

        let device = DeviceStorage {
            total_space: space.total,
            free_space: space.available,
            used_space: space.used().max(app.total_size),
        };

        let info = StorageInfo {
            app,
            device,
            models,
            cache_size,
            stored_models,
            measured_at: Utc::now(),
        };
        if !info.reconciles() {
            warn!("Storage totals do not reconcile");
        }
        debug!(
            app_total = info.app.total_size,
            models_total = info.models.total_size,
            free = info.device.free_space,
            "Storage analyzed"
        );
        Ok(info)
    }
}

impl std::fmt::Debug for StorageAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAnalyzer")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Installer;
    use crate::models::{ModelDescriptor, ModelFormat};
    use crate::platform::DiskSpace;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FixedDisk(DiskSpace);

    impl DiskProbe for FixedDisk {
        fn space(&self, _path: &Path) -> Result<DiskSpace> {
            Ok(self.0)
        }
    }

    fn stored(backend: &str, size: u64) -> StoredModel {
        StoredModel {
            id: format!("{}-{}", backend, size),
            name: String::new(),
            backend: backend.to_string(),
            size,
            path: PathBuf::new(),
            installed_at: None,
        }
    }

    #[test]
    fn test_directory_size_and_extension_filter() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/x.gguf"), [0u8; 10]).unwrap();
        fs::write(tmp.path().join("a/b/y.GGUF"), [0u8; 20]).unwrap();
        fs::write(tmp.path().join("z.txt"), [0u8; 5]).unwrap();

        assert_eq!(directory_size(tmp.path()), 35);
        assert_eq!(size_by_extension(tmp.path(), &["gguf"]), 30);
        assert_eq!(directory_size(&tmp.path().join("missing")), 0);
    }

    #[test]
    fn test_backend_aggregates() {
        let models = vec![stored("llama.cpp", 100), stored("llama.cpp", 300), stored("onnx", 200)];
        let usage = size_by_backend(&models);
        assert_eq!(usage["llama.cpp"].total_size, 400);
        assert_eq!(usage["llama.cpp"].model_count, 2);
        assert_eq!(usage["onnx"].model_count, 1);
        assert_eq!(average_model_size(&models), 200);
        assert_eq!(average_model_size(&[]), 0);
    }

    #[test]
    fn test_estimates() {
        assert_eq!(estimate_download_size(1000), 700);
        assert_eq!(required_storage_with_margin(1000, false), 1200);
        assert_eq!(required_storage_with_margin(1000, true), 2400);
    }

    #[test]
    fn test_analyze_reconciles() {
        let tmp = TempDir::new().unwrap();
        let paths = StoragePaths::new(tmp.path());
        paths.create_all().unwrap();
        fs::write(paths.temp_dir().join("m-1.tmp"), [0u8; 50]).unwrap();
        fs::write(paths.cache_dir().join("c.bin"), [0u8; 25]).unwrap();
        let source = tmp.path().join("m.gguf");
        fs::write(&source, [0u8; 400]).unwrap();
        Installer::new(paths.clone(), 0.01)
            .install(
                &ModelDescriptor {
                    compatible_backends: vec!["llama.cpp".into()],
                    ..ModelDescriptor::new("m", "M", ModelFormat::Gguf)
                },
                &source,
                false,
            )
            .unwrap();

        let disk = FixedDisk(DiskSpace {
            total: 10_000,
            available: 9_990,
        });
        let info = StorageAnalyzer::new(paths, Arc::new(disk)).analyze().unwrap();

        assert_eq!(info.app.temp_size, 50);
        assert_eq!(info.cache_size, 25);
        assert_eq!(info.models.total_size, 400);
        assert_eq!(info.models.by_backend["llama.cpp"].model_count, 1);
        assert!(info.app.models_size >= 400);
        assert!(info.reconciles());
    }
}
