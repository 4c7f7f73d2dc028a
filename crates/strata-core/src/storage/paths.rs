//! Canonical filesystem layout under the storage root.
//!
//! ```text
//! <root>/
//! ├── Downloads/           finalized, not yet installed
//! │   ├── Temp/            in-progress (.tmp) and suspended (.partial) transfers
//! │   └── Extracted/       archive staging
//! ├── Models/<key>/        installed artifact + metadata.json
//! ├── Cache/
//! └── settings.json
//! ```

use crate::config::PathsConfig;
use crate::error::{Result, StrataError};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::DOWNLOADS_DIR_NAME)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.downloads_dir().join(PathsConfig::TEMP_DIR_NAME)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.downloads_dir().join(PathsConfig::EXTRACT_DIR_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::MODELS_DIR_NAME)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::CACHE_DIR_NAME)
    }

    /// `Models/<key>/`
    pub fn model_dir(&self, storage_key: &str) -> PathBuf {
        self.models_dir().join(storage_key)
    }

    /// `Models/<key>/metadata.json`
    pub fn metadata_path(&self, storage_key: &str) -> PathBuf {
        self.model_dir(storage_key).join(PathsConfig::METADATA_FILENAME)
    }

    /// Directories whose contents may be discarded at any time.
    pub fn cache_dirs(&self) -> Vec<PathBuf> {
        vec![self.cache_dir(), self.extract_dir()]
    }

    /// Create every top-level directory of the layout.
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            self.downloads_dir(),
            self.temp_dir(),
            self.extract_dir(),
            self.models_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StrataError::io_with_path(e, &dir))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let paths = StoragePaths::new("/data");
        assert_eq!(paths.temp_dir(), PathBuf::from("/data/Downloads/Temp"));
        assert_eq!(
            paths.metadata_path("tiny-llama"),
            PathBuf::from("/data/Models/tiny-llama/metadata.json")
        );
    }

    #[test]
    fn test_create_all() {
        let tmp = TempDir::new().unwrap();
        let paths = StoragePaths::new(tmp.path());
        paths.create_all().unwrap();
        assert!(paths.temp_dir().is_dir());
        assert!(paths.models_dir().is_dir());
        assert!(paths.cache_dir().is_dir());
    }
}
