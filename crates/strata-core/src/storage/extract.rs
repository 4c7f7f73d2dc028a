//! Archive unpacking for the `Extracting` lifecycle stage.
//!
//! Entries that would land outside the destination (absolute paths, `..`)
//! reject the whole archive.

use crate::error::{Result, StorageError, StrataError};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveKind {
    /// Classify by file name; `None` for anything that is not an archive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(ArchiveKind::TarZst)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest` (emptied first) and return the extracted root.
///
/// When the archive holds a single top-level directory, that directory is
/// the root.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| StorageError::InvalidArchive {
        path: archive.to_path_buf(),
        message: "unrecognised archive type".into(),
    })?;

    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| StrataError::io_with_path(e, dest))?;
    }
    fs::create_dir_all(dest).map_err(|e| StrataError::io_with_path(e, dest))?;

    info!(archive = %archive.display(), dest = %dest.display(), ?kind, "Extracting archive");
    let file = File::open(archive).map_err(|e| StrataError::io_with_path(e, archive))?;
    let unpacked = match kind {
        ArchiveKind::Zip => extract_zip(file, archive, dest),
        ArchiveKind::Tar => extract_tar(tar::Archive::new(BufReader::new(file)), archive, dest),
        ArchiveKind::TarGz => extract_tar(
            tar::Archive::new(flate2::read::GzDecoder::new(BufReader::new(file))),
            archive,
            dest,
        ),
        ArchiveKind::TarZst => {
            let decoder = zstd::stream::Decoder::new(BufReader::new(file))
                .map_err(|e| invalid(archive, format!("zstd decoder: {}", e)))?;
            extract_tar(tar::Archive::new(decoder), archive, dest)
        }
    };
    if let Err(e) = unpacked {
        let _ = fs::remove_dir_all(dest);
        return Err(e);
    }

    Ok(collapse_single_root(dest))
}

fn extract_zip(file: File, archive_path: &Path, dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(file).map_err(|e| invalid(archive_path, e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| invalid(archive_path, format!("entry {}: {}", i, e)))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| invalid(archive_path, format!("entry escapes destination: {}", entry.name())))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| StrataError::io_with_path(e, &out_path))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StrataError::io_with_path(e, parent))?;
        }
        let mut out = File::create(&out_path).map_err(|e| StrataError::io_with_path(e, &out_path))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| StrataError::io_with_path(e, &out_path))?;
    }
    Ok(())
}

fn extract_tar<R: std::io::Read>(mut archive: tar::Archive<R>, archive_path: &Path, dest: &Path) -> Result<()> {
    let entries = archive
        .entries()
        .map_err(|e| invalid(archive_path, e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(archive_path, e.to_string()))?;
        let relative = entry
            .path()
            .map_err(|e| invalid(archive_path, e.to_string()))?
            .into_owned();
        if !is_enclosed(&relative) {
            return Err(invalid(
                archive_path,
                format!("entry escapes destination: {}", relative.display()),
            ));
        }
        entry
            .unpack_in(dest)
            .map_err(|e| invalid(archive_path, format!("{}: {}", relative.display(), e)))?;
    }
    Ok(())
}

fn is_enclosed(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn collapse_single_root(dest: &Path) -> PathBuf {
    let entries: Vec<PathBuf> = fs::read_dir(dest)
        .map(|it| it.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    match entries.as_slice() {
        [only] if only.is_dir() => {
            debug!(root = %only.display(), "Archive has a single top-level directory");
            only.clone()
        }
        _ => dest.to_path_buf(),
    }
}

fn invalid(path: &Path, message: String) -> StrataError {
    StorageError::InvalidArchive {
        path: path.to_path_buf(),
        message,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(ArchiveKind::from_path(Path::new("a.TAR.GZ")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar.zst")), Some(ArchiveKind::TarZst));
        assert_eq!(ArchiveKind::from_path(Path::new("a.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("a.gguf")), None);
    }

    #[test]
    fn test_tar_gz_single_root_collapsed() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("voice.tar.gz");
        build_tar_gz(
            &archive,
            &[("kokoro/model.onnx", b"\x08\x07onnx"), ("kokoro/tokens.txt", b"a b")],
        );

        let root = extract_archive(&archive, &tmp.path().join("out")).unwrap();
        assert_eq!(root, tmp.path().join("out/kokoro"));
        assert!(root.join("tokens.txt").is_file());
    }

    #[test]
    fn test_zip_extracts_flat() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("m.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("model.tflite", options).unwrap();
        writer.write_all(b"\x1c\x00\x00\x00TFL3").unwrap();
        writer.start_file("labels.txt", options).unwrap();
        writer.write_all(b"cat").unwrap();
        writer.finish().unwrap();

        let out = tmp.path().join("out");
        let root = extract_archive(&archive, &out).unwrap();
        assert_eq!(root, out);
        assert!(out.join("model.tflite").is_file());
    }

    #[test]
    fn test_escaping_entry_rejected() {
        assert!(is_enclosed(Path::new("a/b/c.bin")));
        assert!(!is_enclosed(Path::new("../evil")));
        assert!(!is_enclosed(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_non_archive_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = extract_archive(&tmp.path().join("m.gguf"), &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, StrataError::Storage(StorageError::InvalidArchive { .. })));
    }
}
