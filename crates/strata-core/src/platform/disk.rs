use crate::error::{Result, StorageError};
use std::path::Path;

/// Capacity of the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskSpace {
    pub total: u64,
    pub available: u64,
}

impl DiskSpace {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    /// Used fraction in `0.0..=1.0`; zero for an unknown volume.
    pub fn usage_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used() as f64 / self.total as f64
    }
}

/// Reports free and total space for a path.
pub trait DiskProbe: Send + Sync {
    fn space(&self, path: &Path) -> Result<DiskSpace>;
}

/// Queries the filesystem through `statvfs`/`GetDiskFreeSpaceEx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2DiskProbe;

impl DiskProbe for Fs2DiskProbe {
    fn space(&self, path: &Path) -> Result<DiskSpace> {
        // The target may not exist yet; measure its nearest existing ancestor.
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;

        let io_err = |e: std::io::Error| StorageError::Io {
            message: e.to_string(),
            path: Some(existing.to_path_buf()),
            source: Some(e),
        };
        Ok(DiskSpace {
            total: fs2::total_space(existing).map_err(io_err)?,
            available: fs2::available_space(existing).map_err(io_err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_reports_space_for_missing_child() {
        let tmp = TempDir::new().unwrap();
        let space = Fs2DiskProbe
            .space(&tmp.path().join("not/yet/created"))
            .unwrap();
        assert!(space.total > 0);
        assert!(space.available <= space.total);
    }

    #[test]
    fn test_usage_ratio() {
        let space = DiskSpace {
            total: 200,
            available: 20,
        };
        assert_eq!(space.used(), 180);
        assert!((space.usage_ratio() - 0.9).abs() < f64::EPSILON);
        assert_eq!(DiskSpace::default().usage_ratio(), 0.0);
    }
}
