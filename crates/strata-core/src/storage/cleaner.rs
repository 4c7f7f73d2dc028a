//! Space reclamation: expired cache entries, old downloads, orphaned
//! partial transfers, and the staged automatic cleanup that escalates
//! through them until a free-space target is met.
//!
//! A file that cannot be deleted is logged and skipped; the pass continues.

use super::analyzer::artifact_size;
use super::download::{is_incomplete, DownloadStorage};
use super::paths::StoragePaths;
use crate::error::{Result, StrataError};
use crate::platform::DiskProbe;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Escalation stages of automatic cleanup, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStage {
    OldDownloads,
    PartialDownloads,
    FullCacheClear,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub stages_run: Vec<CleanupStage>,
    pub files_removed: usize,
    pub bytes_reclaimed: u64,
    /// Entries that could not be removed.
    pub failures: usize,
    /// Set by automatic cleanup; true when free space reached the target.
    pub target_reached: bool,
}

impl CleanupReport {
    fn absorb(&mut self, other: CleanupReport) {
        self.files_removed += other.files_removed;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.failures += other.failures;
    }

    fn remove(&mut self, path: &Path) {
        let size = artifact_size(path);
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => {
                self.files_removed += 1;
                self.bytes_reclaimed += size;
                debug!(path = %path.display(), size, "Removed");
            }
            Err(e) => {
                self.failures += 1;
                warn!(path = %path.display(), error = %e, "Failed to remove, skipping");
            }
        }
    }
}

pub struct StorageCleaner {
    paths: StoragePaths,
    disk: Arc<dyn DiskProbe>,
    downloads: Arc<DownloadStorage>,
    retention: Duration,
}

impl StorageCleaner {
    pub fn new(
        paths: StoragePaths,
        disk: Arc<dyn DiskProbe>,
        downloads: Arc<DownloadStorage>,
        retention: Duration,
    ) -> Self {
        Self {
            paths,
            disk,
            downloads,
            retention,
        }
    }

    /// Delete cache files older than the retention window, then make sure
    /// the cache directories exist again.
    pub fn cleanup_cache(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for dir in self.paths.cache_dirs() {
            let expired: Vec<_> = WalkDir::new(&dir)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && self.is_expired(e.path()))
                .map(|e| e.into_path())
                .collect();
            for path in expired {
                if self.downloads.is_staged(&path) {
                    debug!(path = %path.display(), "Skipping file in active staging directory");
                    continue;
                }
                report.remove(&path);
            }
            prune_empty_dirs(&dir, |path| self.downloads.is_staged(path));
            recreate(&dir)?;
        }
        info!(files = report.files_removed, bytes = report.bytes_reclaimed, "Cache cleanup finished");
        Ok(report)
    }

    /// Delete finalized downloads older than the retention window.
    pub fn cleanup_old_downloads(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for path in list_files(&self.paths.downloads_dir()) {
            if self.is_expired(&path) {
                report.remove(&path);
            }
        }
        info!(files = report.files_removed, bytes = report.bytes_reclaimed, "Old download cleanup finished");
        Ok(report)
    }

    /// Delete `.tmp`/`.partial` transfers unless a live download still owns them.
    pub fn cleanup_partial_downloads(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for path in list_files(&self.paths.temp_dir()) {
            if !is_incomplete(&path) {
                continue;
            }
            if self.downloads.is_active(&path) {
                debug!(path = %path.display(), "Skipping active partial download");
                continue;
            }
            report.remove(&path);
            self.downloads.release(&path);
        }
        info!(files = report.files_removed, bytes = report.bytes_reclaimed, "Partial download cleanup finished");
        Ok(report)
    }

    /// Remove everything in the cache directories except staging
    /// directories an extraction still owns.
    pub fn clear_cache(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for dir in self.paths.cache_dirs() {
            if let Ok(entries) = fs::read_dir(&dir) {
                for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
                    if self.downloads.is_staged(&path) {
                        debug!(path = %path.display(), "Skipping active staging directory");
                        continue;
                    }
                    report.remove(&path);
                }
            }
            recreate(&dir)?;
        }
        info!(files = report.files_removed, bytes = report.bytes_reclaimed, "Cache cleared");
        Ok(report)
    }

    /// Escalate through cleanup stages until `target_free_space` bytes are free.
    ///
    /// Free space is re-measured after every stage. The full cache clear only
    /// runs when `preserve_recent` is false.
    pub fn perform_automatic_cleanup(
        &self,
        target_free_space: u64,
        preserve_recent: bool,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        if self.free_space()? >= target_free_space {
            report.target_reached = true;
            return Ok(report);
        }

        let mut stages = vec![CleanupStage::OldDownloads, CleanupStage::PartialDownloads];
        if !preserve_recent {
            stages.push(CleanupStage::FullCacheClear);
        }

        for stage in stages {
            let outcome = match stage {
                CleanupStage::OldDownloads => self.cleanup_old_downloads()?,
                CleanupStage::PartialDownloads => self.cleanup_partial_downloads()?,
                CleanupStage::FullCacheClear => self.clear_cache()?,
            };
            report.stages_run.push(stage);
            report.absorb(outcome);

            if self.free_space()? >= target_free_space {
                report.target_reached = true;
                break;
            }
        }

        if report.target_reached {
            info!(stages = ?report.stages_run, bytes = report.bytes_reclaimed, "Automatic cleanup reached target");
        } else {
            warn!(
                stages = ?report.stages_run,
                bytes = report.bytes_reclaimed,
                target_free_space,
                "Automatic cleanup could not reach target"
            );
        }
        Ok(report)
    }

    fn free_space(&self) -> Result<u64> {
        Ok(self.disk.space(self.paths.root())?.available)
    }

    fn is_expired(&self, path: &Path) -> bool {
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.retention)
    }
}

impl std::fmt::Debug for StorageCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCleaner")
            .field("paths", &self.paths)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

/// Regular files directly inside `dir`.
fn list_files(dir: &Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default()
}

fn prune_empty_dirs(root: &Path, keep: impl Fn(&Path) -> bool) {
    let dirs: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && !keep(e.path()))
        .map(|e| e.into_path())
        .collect();
    for dir in dirs {
        // Fails harmlessly when the directory still has entries.
        let _ = fs::remove_dir(&dir);
    }
}

fn recreate(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| StrataError::io_with_path(e, dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelDescriptor, ModelFormat};
    use crate::platform::Fs2DiskProbe;
    use std::fs::File;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn age(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    fn setup(tmp: &TempDir) -> (StorageCleaner, Arc<DownloadStorage>) {
        let paths = StoragePaths::new(tmp.path());
        paths.create_all().unwrap();
        let disk: Arc<dyn DiskProbe> = Arc::new(Fs2DiskProbe);
        let downloads = Arc::new(DownloadStorage::new(paths.clone(), disk.clone(), DAY));
        let cleaner = StorageCleaner::new(paths, disk, downloads.clone(), 7 * DAY);
        (cleaner, downloads)
    }

    #[test]
    fn test_cache_cleanup_respects_retention() {
        let tmp = TempDir::new().unwrap();
        let (cleaner, _) = setup(&tmp);
        let cache = tmp.path().join("Cache");
        fs::create_dir_all(cache.join("nested")).unwrap();
        fs::write(cache.join("nested/old.bin"), [0u8; 100]).unwrap();
        fs::write(cache.join("fresh.bin"), [0u8; 10]).unwrap();
        age(&cache.join("nested/old.bin"), 8 * DAY);

        let report = cleaner.cleanup_cache().unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.bytes_reclaimed, 100);
        assert!(cache.join("fresh.bin").exists());
        assert!(!cache.join("nested").exists());
        assert!(cache.is_dir());
    }

    #[test]
    fn test_partial_cleanup_skips_active() {
        let tmp = TempDir::new().unwrap();
        let (cleaner, downloads) = setup(&tmp);
        let descriptor = ModelDescriptor::new("m", "M", ModelFormat::Gguf);
        let active = downloads.temporary_path(&descriptor).unwrap();
        fs::write(&active, [0u8; 5]).unwrap();
        let orphan = tmp.path().join("Downloads/Temp/other-1.partial");
        fs::write(&orphan, [0u8; 7]).unwrap();
        let unrelated = tmp.path().join("Downloads/Temp/notes.txt");
        fs::write(&unrelated, b"keep").unwrap();

        let report = cleaner.cleanup_partial_downloads().unwrap();
        assert_eq!(report.bytes_reclaimed, 7);
        assert!(active.exists());
        assert!(!orphan.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_clear_cache_recreates_dirs() {
        let tmp = TempDir::new().unwrap();
        let (cleaner, _) = setup(&tmp);
        let extracted = tmp.path().join("Downloads/Extracted/pkg");
        fs::create_dir_all(&extracted).unwrap();
        fs::write(extracted.join("a.onnx"), [0u8; 3]).unwrap();
        fs::write(tmp.path().join("Cache/c"), [0u8; 4]).unwrap();

        let report = cleaner.clear_cache().unwrap();
        assert_eq!(report.bytes_reclaimed, 7);
        assert!(tmp.path().join("Cache").is_dir());
        assert!(tmp.path().join("Downloads/Extracted").is_dir());
        assert!(!extracted.exists());
    }

    #[test]
    fn test_staged_extraction_survives_cache_passes() {
        let tmp = TempDir::new().unwrap();
        let (cleaner, downloads) = setup(&tmp);
        let staged = tmp.path().join("Downloads/Extracted/voice");
        fs::create_dir_all(staged.join("empty")).unwrap();
        fs::write(staged.join("model.onnx"), [0u8; 6]).unwrap();
        age(&staged.join("model.onnx"), 30 * DAY);
        let stale = tmp.path().join("Downloads/Extracted/abandoned");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.onnx"), [0u8; 2]).unwrap();
        age(&stale.join("old.onnx"), 30 * DAY);
        downloads.track_staging(&staged, "voice");

        let report = cleaner.cleanup_cache().unwrap();
        assert_eq!(report.bytes_reclaimed, 2);
        assert!(staged.join("model.onnx").exists());
        assert!(staged.join("empty").is_dir());

        let report = cleaner.perform_automatic_cleanup(u64::MAX, false).unwrap();
        assert!(report.stages_run.contains(&CleanupStage::FullCacheClear));
        assert!(staged.join("model.onnx").exists());

        downloads.release_staging(&staged);
        cleaner.clear_cache().unwrap();
        assert!(!staged.exists());
    }

    #[test]
    fn test_automatic_cleanup_noop_when_satisfied() {
        let tmp = TempDir::new().unwrap();
        let (cleaner, _) = setup(&tmp);
        let report = cleaner.perform_automatic_cleanup(0, true).unwrap();
        assert!(report.target_reached);
        assert!(report.stages_run.is_empty());
    }
}
