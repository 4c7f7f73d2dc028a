//! Temporary and finalized download files.
//!
//! In-progress transfers live in `Downloads/Temp/<key>-<uuid>.tmp`. A
//! cancelled transfer is renamed to `.partial` and left for a later resume.
//! Paths handed out here are tracked as active until finalized or released,
//! and the cleaner never deletes an active path that is not stale.
//! Extraction staging directories are tracked the same way until the
//! session that owns them releases them.

use super::paths::StoragePaths;
use crate::config::{DownloadConfig, StorageConfig};
use crate::error::{DownloadError, Result, StorageError, StrataError};
use crate::models::{check_model_id, ModelDescriptor};
use crate::platform::DiskProbe;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Multi-part archive suffixes kept intact in finalized file names.
const ARCHIVE_SUFFIXES: &[&str] = &["tar.gz", "tar.zst", "tgz", "tar", "zip"];

/// An incomplete transfer found in the temp area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDownload {
    pub model_id: String,
    pub temp_path: PathBuf,
    pub bytes_written: u64,
}

#[derive(Debug, Clone)]
struct ActivePartial {
    model_id: String,
    touched: Instant,
}

pub struct DownloadStorage {
    paths: StoragePaths,
    disk: Arc<dyn DiskProbe>,
    stale_after: Duration,
    active: Mutex<HashMap<PathBuf, ActivePartial>>,
    /// Staging directory → owning model id.
    staging: Mutex<HashMap<PathBuf, String>>,
}

impl DownloadStorage {
    pub fn new(paths: StoragePaths, disk: Arc<dyn DiskProbe>, stale_after: Duration) -> Self {
        Self {
            paths,
            disk,
            stale_after,
            active: Mutex::new(HashMap::new()),
            staging: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh temp path for one download attempt and mark it active.
    pub fn temporary_path(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let path = self.fresh_temp_path(descriptor)?;
        self.track(&path, &descriptor.id);
        Ok(path)
    }

    /// Like [`temporary_path`](Self::temporary_path), but refuses when a
    /// transfer for the same model is already in flight.
    pub fn begin_download(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let path = self.fresh_temp_path(descriptor)?;
        let mut active = self.lock_active();
        if active
            .iter()
            .any(|(p, entry)| entry.model_id == descriptor.id && is_temp(p))
        {
            return Err(DownloadError::AlreadyDownloading {
                model_id: descriptor.id.clone(),
            }
            .into());
        }
        active.insert(
            path.clone(),
            ActivePartial {
                model_id: descriptor.id.clone(),
                touched: Instant::now(),
            },
        );
        Ok(path)
    }

    fn fresh_temp_path(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        check_model_id(&descriptor.id)?;
        let temp_dir = self.paths.temp_dir();
        fs::create_dir_all(&temp_dir).map_err(|e| StrataError::io_with_path(e, &temp_dir))?;

        Ok(temp_dir.join(format!(
            "{}-{}.{}",
            descriptor.storage_key(),
            uuid::Uuid::new_v4().simple(),
            DownloadConfig::TEMP_SUFFIX
        )))
    }

    /// Largest temp or partial file belonging to `descriptor`, if any.
    pub fn partial_download_exists(&self, descriptor: &ModelDescriptor) -> Option<PartialDownload> {
        let prefix = format!("{}-", descriptor.storage_key());
        fs::read_dir(self.paths.temp_dir())
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with(&prefix) && is_incomplete(Path::new(&name))
            })
            .filter_map(|e| {
                let len = e.metadata().ok()?.len();
                Some(PartialDownload {
                    model_id: descriptor.id.clone(),
                    temp_path: e.path(),
                    bytes_written: len,
                })
            })
            .max_by_key(|p| p.bytes_written)
    }

    /// Canonical pre-install location for `descriptor`'s download.
    pub fn download_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.paths
            .downloads_dir()
            .join(format!("{}.{}", descriptor.storage_key(), download_suffix(descriptor)))
    }

    /// Move a completed temp file into `Downloads/`, replacing a stale copy.
    pub fn finalize_download(&self, temp_path: &Path, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let target = self.download_path(descriptor);
        if target.exists() {
            fs::remove_file(&target).map_err(|e| DownloadError::file_system(e, &target))?;
        }
        fs::rename(temp_path, &target).map_err(|e| DownloadError::file_system(e, temp_path))?;
        self.release(temp_path);

        info!(model_id = %descriptor.id, path = %target.display(), "Download finalized");
        Ok(target)
    }

    /// Tag an interrupted transfer as `.partial` so it survives for resume.
    pub fn suspend(&self, temp_path: &Path) -> Result<PathBuf> {
        let partial = temp_path.with_extension(DownloadConfig::PARTIAL_SUFFIX);
        if temp_path != partial {
            fs::rename(temp_path, &partial).map_err(|e| StrataError::io_with_path(e, temp_path))?;
        }
        let mut active = self.lock_active();
        if let Some(entry) = active.remove(temp_path) {
            active.insert(
                partial.clone(),
                ActivePartial {
                    touched: Instant::now(),
                    ..entry
                },
            );
        }
        debug!(path = %partial.display(), "Download suspended");
        Ok(partial)
    }

    /// Require `required * DOWNLOAD_SPACE_FACTOR` free bytes.
    pub fn verify_space(&self, required: u64) -> Result<()> {
        let needed = (required as f64 * StorageConfig::DOWNLOAD_SPACE_FACTOR).ceil() as u64;
        let available = self.disk.space(self.paths.root())?.available;
        if available < needed {
            warn!(needed, available, "Not enough space to start download");
            return Err(StorageError::InsufficientSpace {
                required: needed,
                available,
            }
            .into());
        }
        Ok(())
    }

    /// Mark `path` as in use by a transfer for `model_id`.
    pub fn track(&self, path: &Path, model_id: &str) {
        self.lock_active().insert(
            path.to_path_buf(),
            ActivePartial {
                model_id: model_id.to_string(),
                touched: Instant::now(),
            },
        );
    }

    /// Refresh the activity time of a tracked path.
    pub fn touch(&self, path: &Path) {
        if let Some(entry) = self.lock_active().get_mut(path) {
            entry.touched = Instant::now();
        }
    }

    pub fn release(&self, path: &Path) {
        self.lock_active().remove(path);
    }

    /// True while a tracked path has seen activity within the staleness window.
    pub fn is_active(&self, path: &Path) -> bool {
        self.lock_active()
            .get(path)
            .is_some_and(|entry| entry.touched.elapsed() < self.stale_after)
    }

    /// Whether any tracked path belongs to `model_id`.
    pub fn is_downloading(&self, model_id: &str) -> bool {
        self.lock_active()
            .iter()
            .any(|(path, entry)| entry.model_id == model_id && is_temp(path))
    }

    /// Protect an extraction directory from cache cleanup until released.
    pub fn track_staging(&self, dir: &Path, model_id: &str) {
        debug!(model_id, dir = %dir.display(), "Staging directory in use");
        self.lock_staging().insert(dir.to_path_buf(), model_id.to_string());
    }

    pub fn release_staging(&self, dir: &Path) {
        self.lock_staging().remove(dir);
    }

    /// True when `path` is a staging directory in use, lies inside one, or
    /// contains one.
    pub fn is_staged(&self, path: &Path) -> bool {
        self.lock_staging()
            .keys()
            .any(|dir| path.starts_with(dir) || dir.starts_with(path))
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    fn lock_staging(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        self.staging.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<PathBuf, ActivePartial>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DownloadStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStorage")
            .field("paths", &self.paths)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

fn is_temp(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == DownloadConfig::TEMP_SUFFIX)
}

/// `.tmp` or `.partial`
pub(crate) fn is_incomplete(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == DownloadConfig::TEMP_SUFFIX || e == DownloadConfig::PARTIAL_SUFFIX)
}

/// Suffix for a finalized download: the URL's archive suffix or extension,
/// falling back to the declared format's primary extension.
fn download_suffix(descriptor: &ModelDescriptor) -> String {
    let from_url = descriptor
        .download_url
        .as_deref()
        .and_then(|raw| url::Url::parse(raw).ok())
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_ascii_lowercase))
        })
        .filter(|name| !name.is_empty());

    if let Some(name) = from_url {
        if let Some(suffix) = ARCHIVE_SUFFIXES
            .iter()
            .find(|s| name.ends_with(&format!(".{}", s)))
        {
            return suffix.to_string();
        }
        if let Some(ext) = Path::new(&name).extension().and_then(|e| e.to_str()) {
            return ext.to_string();
        }
    }
    descriptor
        .format
        .extensions()
        .next()
        .unwrap_or("bin")
        .to_string()
}
