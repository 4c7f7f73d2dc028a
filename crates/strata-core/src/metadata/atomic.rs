//! Atomic file operations for safe JSON persistence.
//!
//! Writes go to a temp file with a PID+TID suffix, are flushed and synced,
//! optionally back up the previous file, then rename over the target.

use crate::error::{Result, StrataError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::process;
use std::thread;
use tracing::{debug, warn};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut contents = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut contents))
        .map_err(|e| StrataError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;

    let data: T = serde_json::from_str(&contents).map_err(|e| StrataError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| StrataError::io_with_path(e, parent))?;
        }
    }

    let temp_path = path.with_extension(format!("json.{}.{}.tmp", process::id(), thread_id()));

    let serialized = serde_json::to_string_pretty(data).map_err(|e| StrataError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| StrataError::io_with_path(e, &temp_path))?;

        file.write_all(serialized.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                StrataError::io_with_path(e, &temp_path)
            })?;
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("Failed to create backup {}: {}", backup_path.display(), e);
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StrataError::Io {
            message: format!("Failed to rename {} to {}", temp_path.display(), path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        id: String,
        size: u64,
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("record.json");
        let record = Record {
            id: "tiny-llama".into(),
            size: 42,
        };

        atomic_write_json(&path, &record, false).unwrap();
        let read: Option<Record> = atomic_read_json(&path).unwrap();
        assert_eq!(read, Some(record));
    }

    #[test]
    fn test_backup_keeps_previous_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record.json");
        let first = Record { id: "a".into(), size: 1 };
        let second = Record { id: "b".into(), size: 2 };

        atomic_write_json(&path, &first, true).unwrap();
        atomic_write_json(&path, &second, true).unwrap();

        let backup: Option<Record> = atomic_read_json(&path.with_extension("json.bak")).unwrap();
        assert_eq!(backup, Some(first));
        let current: Option<Record> = atomic_read_json(&path).unwrap();
        assert_eq!(current, Some(second));
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let read: Option<Record> = atomic_read_json(&temp_dir.path().join("missing.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_read_malformed_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(atomic_read_json::<Record>(&path).is_err());
    }
}
