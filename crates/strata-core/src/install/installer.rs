//! The only writer of canonical install locations.
//!
//! An install is a move (or copy across volumes) into `Models/<key>/`,
//! followed by a `metadata.json` sidecar and a post-move size check. A failed
//! check removes what was written before the error is returned.

use crate::config::PathsConfig;
use crate::error::{Result, StorageError, StrataError};
use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::models::{check_model_id, sanitize_id, ModelDescriptor, ModelFormat};
use crate::storage::{artifact_size, StoragePaths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extension used when the source artifact has none.
const DEFAULT_EXTENSION: &str = "model";

/// Sidecar written next to every installed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRecord {
    pub id: String,
    pub name: String,
    pub installed_path: PathBuf,
    pub install_date: DateTime<Utc>,
    #[serde(default)]
    pub format: Option<ModelFormat>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Installer {
    paths: StoragePaths,
    size_tolerance: f64,
}

impl Installer {
    pub fn new(paths: StoragePaths, size_tolerance: f64) -> Self {
        Self {
            paths,
            size_tolerance,
        }
    }

    /// Canonical location of `descriptor`'s artifact when installed from `source`.
    pub fn install_path(&self, descriptor: &ModelDescriptor, source: &Path) -> PathBuf {
        let key = descriptor.storage_key();
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        self.paths
            .model_dir(&key)
            .join(format!("{}.{}", key, extension))
    }

    /// Install `source` as `descriptor`'s artifact and return the installed path.
    ///
    /// With `replace_existing == false` an existing install is returned untouched.
    pub fn install(
        &self,
        descriptor: &ModelDescriptor,
        source: &Path,
        replace_existing: bool,
    ) -> Result<PathBuf> {
        check_model_id(&descriptor.id)?;
        if !source.exists() {
            return Err(StorageError::NotFound(source.to_path_buf()).into());
        }

        let key = descriptor.storage_key();
        let model_dir = self.paths.model_dir(&key);
        let target = self.install_path(descriptor, source);

        if let Some(existing) = self.installed_path(&descriptor.id) {
            if !replace_existing {
                info!(model_id = %descriptor.id, path = %existing.display(), "Model already installed");
                return Ok(existing);
            }
            debug!(model_id = %descriptor.id, "Replacing existing install");
            remove_path(&model_dir)?;
        } else if target.exists() {
            // Leftover from an install whose record was lost.
            remove_path(&target)?;
        }

        move_into(&model_dir, source, &target)?;

        let size_bytes = artifact_size(&target);
        let record = InstallRecord {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            installed_path: target.clone(),
            install_date: Utc::now(),
            format: Some(descriptor.format),
            backend: descriptor.compatible_backends.first().cloned(),
            size_bytes,
        };
        let written = atomic_write_json(&self.paths.metadata_path(&key), &record, false);

        if let Err(reason) = written.and_then(|_| self.verify(descriptor, &target, size_bytes)) {
            warn!(model_id = %descriptor.id, error = %reason, "Install verification failed, rolling back");
            if let Err(e) = remove_path(&model_dir) {
                warn!(path = %model_dir.display(), error = %e, "Rollback left files behind");
            }
            return Err(StrataError::ExtractionFailed {
                model_id: descriptor.id.clone(),
                reason: reason.to_string(),
            });
        }

        info!(model_id = %descriptor.id, path = %target.display(), size_bytes, "Model installed");
        Ok(target)
    }

    fn verify(&self, descriptor: &ModelDescriptor, target: &Path, actual: u64) -> Result<()> {
        if !target.exists() {
            return Err(StorageError::NotFound(target.to_path_buf()).into());
        }
        // An archive's declared size is that of the download, not the unpacked tree.
        if let Some(expected) = descriptor.expected_size.filter(|_| !descriptor.is_archive) {
            let tolerance = (expected as f64 * self.size_tolerance).ceil() as u64;
            if actual.abs_diff(expected) > tolerance {
                return Err(StrataError::Other(format!(
                    "installed size {} bytes differs from declared {} bytes",
                    actual, expected
                )));
            }
        }
        Ok(())
    }

    /// Remove the whole per-model directory. Returns false if nothing was installed.
    pub fn uninstall(&self, model_id: &str) -> Result<bool> {
        check_model_id(model_id)?;
        let model_dir = self.paths.model_dir(&sanitize_id(model_id));
        if !model_dir.exists() {
            return Ok(false);
        }
        remove_path(&model_dir)?;
        info!(model_id, "Model uninstalled");
        Ok(true)
    }

    pub fn record(&self, model_id: &str) -> Result<Option<InstallRecord>> {
        check_model_id(model_id)?;
        atomic_read_json(&self.paths.metadata_path(&sanitize_id(model_id)))
    }

    /// Installed artifact path, if the install is intact.
    pub fn installed_path(&self, model_id: &str) -> Option<PathBuf> {
        let record = self.record(model_id).ok().flatten()?;
        record.installed_path.exists().then_some(record.installed_path)
    }

    pub fn list_installed(&self) -> Vec<InstallRecord> {
        load_inventory(&self.paths.models_dir())
    }
}

/// Every readable `Models/*/metadata.json`, sorted by id.
pub fn load_inventory(models_dir: &Path) -> Vec<InstallRecord> {
    let Ok(entries) = fs::read_dir(models_dir) else {
        return Vec::new();
    };
    let mut records: Vec<InstallRecord> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path().join(PathsConfig::METADATA_FILENAME))
        .filter(|p| p.is_file())
        .filter_map(|p| match atomic_read_json::<InstallRecord>(&p) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %p.display(), error = %e, "Skipping unreadable install record");
                None
            }
        })
        .collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

/// Create `model_dir` and move `source` to `target` inside it. On failure the
/// directory is removed again.
fn move_into(model_dir: &Path, source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(model_dir).map_err(|e| StrataError::io_with_path(e, model_dir))?;
    if let Err(e) = move_artifact(source, target) {
        if let Err(cleanup) = remove_path(model_dir) {
            warn!(path = %model_dir.display(), error = %cleanup, "Could not remove model directory");
        }
        return Err(e);
    }
    Ok(())
}

/// Rename, falling back to copy-then-delete when the rename crosses volumes.
fn move_artifact(source: &Path, target: &Path) -> Result<()> {
    match fs::rename(source, target) {
        Ok(()) => return Ok(()),
        Err(e) => debug!(error = %e, "Rename failed, copying instead"),
    }

    let copied = if source.is_dir() {
        copy_dir(source, target)
    } else {
        fs::copy(source, target)
            .map(|_| ())
            .map_err(|e| StrataError::io_with_path(e, target))
    };
    if let Err(e) = copied {
        let _ = remove_path(target);
        return Err(e);
    }
    remove_path(source)
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| StrataError::Other(e.to_string()))?;
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| StrataError::io_with_path(e, &dest))?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| StrataError::io_with_path(e, &dest))?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    };
    removed.map_err(|e| StrataError::io_with_path(e, path))
}
