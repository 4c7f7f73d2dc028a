//! Binary model format detection.
//!
//! Resolution order:
//! 1. Exact extension match against the static extension table
//! 2. For generic extensions, fingerprints from sibling files
//! 3. Magic-byte sniffing of the first 16 bytes
//!
//! Detection never fails; `None` means no signal matched.

use crate::models::ModelFormat;
use crate::storage::artifact_size;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Magic literals used for content sniffing.
pub(crate) mod magic {
    pub const GGUF: &[u8; 4] = b"GGUF";
    /// Legacy GGML containers: unversioned, `ggmf` (stored little-endian as `lmgg`) and `ggjt`.
    pub const GGML: &[&[u8; 4]] = &[b"ggml", b"lmgg", b"ggjt", b"fmgg", b"tjgg"];
    /// Flatbuffer file identifier, stored at byte offset 4.
    pub const TFLITE: &[u8; 4] = b"TFL3";
    /// Leading field tags of a protobuf `ModelProto` (`ir_version` varint, or a length-delimited field).
    pub const PROTOBUF_TAGS: [u8; 2] = [0x08, 0x0A];
}

/// Extensions that carry no format information on their own.
const GENERIC_EXTENSIONS: &[&str] = &["bin", "model", "dat", "weights", ""];

/// Sibling file that marks a Hugging Face style package.
const CONFIG_DESCRIPTOR: &str = "config.json";

/// How deep [`primary_artifact`] looks inside an unpacked package.
const PACKAGE_SEARCH_DEPTH: usize = 4;

/// Infers the binary format of a model file or directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatDetector;

impl FormatDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, path: impl AsRef<Path>) -> Option<ModelFormat> {
        let path = path.as_ref();
        let extension = extension_of(path);

        if let Some(format) = ModelFormat::from_extension(&extension) {
            return Some(format);
        }

        if path.is_dir() {
            return detect_directory(path);
        }

        if GENERIC_EXTENSIONS.contains(&extension.as_str()) {
            if let Some(format) = detect_from_siblings(path) {
                trace!(path = %path.display(), %format, "Format inferred from siblings");
                return Some(format);
            }
        }

        let header = read_header(path)?;
        let format = sniff(&header);
        trace!(path = %path.display(), ?format, "Format sniffed from header");
        format
    }
}

/// The entry that carries `format`'s weights when `path` is a package.
///
/// A file is its own artifact. So is a directory the format's validator
/// reads as a whole: a safetensors package with a `config.json`, or a CoreML
/// bundle named with a CoreML extension. Otherwise the largest entry below
/// `path` with one of the format's extensions wins, ties going to the
/// lexicographically first path. `None` when no such entry exists.
pub fn primary_artifact(path: &Path, format: ModelFormat) -> Option<PathBuf> {
    if !path.is_dir() {
        return Some(path.to_path_buf());
    }
    let own_extension = extension_of(path);
    let is_package = match format {
        ModelFormat::Safetensors => path.join(CONFIG_DESCRIPTOR).is_file(),
        _ => format.extensions().any(|ext| ext == own_extension),
    };
    if is_package {
        return Some(path.to_path_buf());
    }

    let bundles = format == ModelFormat::CoreMl;
    let mut candidates: Vec<(u64, PathBuf)> = WalkDir::new(path)
        .min_depth(1)
        .max_depth(PACKAGE_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() || (bundles && e.file_type().is_dir()))
        .filter(|e| {
            let extension = extension_of(e.path());
            format.extensions().any(|ext| ext == extension)
        })
        .map(|e| (artifact_size(e.path()), e.into_path()))
        .collect();
    candidates.sort_by(|(size_a, path_a), (size_b, path_b)| {
        size_b.cmp(size_a).then_with(|| path_a.cmp(path_b))
    });
    let chosen = candidates.into_iter().next().map(|(_, p)| p);
    trace!(package = %path.display(), ?chosen, "Primary artifact resolved");
    chosen
}

/// Classify a header buffer by its magic bytes.
pub fn sniff(header: &[u8]) -> Option<ModelFormat> {
    if header.len() < 4 {
        return None;
    }

    if &header[..4] == magic::GGUF {
        return Some(ModelFormat::Gguf);
    }
    if magic::GGML.iter().any(|m| &header[..4] == *m) {
        return Some(ModelFormat::Ggml);
    }
    if header.len() >= 8 && &header[4..8] == magic::TFLITE {
        return Some(ModelFormat::TfLite);
    }
    if looks_like_safetensors(header) {
        return Some(ModelFormat::Safetensors);
    }
    if magic::PROTOBUF_TAGS.contains(&header[0]) {
        return Some(ModelFormat::Onnx);
    }

    None
}

/// 8-byte little-endian header length followed by a JSON object.
fn looks_like_safetensors(header: &[u8]) -> bool {
    if header.len() < 9 {
        return false;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[..8]);
    let header_len = u64::from_le_bytes(len_bytes);
    header_len > 1 && header_len < 100_000_000 && header[8] == b'{'
}

fn detect_directory(dir: &Path) -> Option<ModelFormat> {
    let names = list_names(dir);
    let has = |ext: &str| {
        names
            .iter()
            .any(|n| extension_of(Path::new(n)) == ext)
    };

    if has("safetensors") {
        return Some(ModelFormat::Safetensors);
    }
    if names.iter().any(|n| n == CONFIG_DESCRIPTOR) && has("bin") {
        return Some(ModelFormat::Safetensors);
    }
    ["gguf", "onnx", "tflite", "mlmodel"]
        .iter()
        .find(|ext| has(ext))
        .and_then(|ext| ModelFormat::from_extension(ext))
}

fn detect_from_siblings(path: &Path) -> Option<ModelFormat> {
    let file_name = path.file_name()?.to_string_lossy().to_lowercase();
    if file_name.contains("gguf") {
        return Some(ModelFormat::Gguf);
    }
    if file_name.contains("ggml") {
        return Some(ModelFormat::Ggml);
    }

    let parent = path.parent()?;
    if parent.join(CONFIG_DESCRIPTOR).is_file() {
        return Some(ModelFormat::Safetensors);
    }
    None
}

fn read_header(path: &Path) -> Option<Vec<u8>> {
    let mut file = fs::File::open(path).ok()?;
    let mut header = vec![0u8; 16];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    header.truncate(filled);
    Some(header)
}

fn list_names(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_extension_wins() {
        let tmp = TempDir::new().unwrap();
        // Content says ONNX, extension says GGUF.
        let path = write(tmp.path(), "model.gguf", &[0x08, 0x01, 0x02, 0x03]);
        assert_eq!(FormatDetector::new().detect(&path), Some(ModelFormat::Gguf));
    }

    #[test]
    fn test_sibling_config_implies_safetensors() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config.json", b"{}");
        let path = write(tmp.path(), "weights.bin", &[0u8; 32]);
        assert_eq!(
            FormatDetector::new().detect(&path),
            Some(ModelFormat::Safetensors)
        );
    }

    #[test]
    fn test_filename_substring_implies_ggml() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "ggml-base.en.bin", &[0u8; 32]);
        assert_eq!(FormatDetector::new().detect(&path), Some(ModelFormat::Ggml));
    }

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(sniff(b"GGUF\x03\x00\x00\x00"), Some(ModelFormat::Gguf));
        assert_eq!(sniff(b"ggjt\x01\x00\x00\x00"), Some(ModelFormat::Ggml));
        assert_eq!(sniff(b"\x1c\x00\x00\x00TFL3\x00\x00"), Some(ModelFormat::TfLite));
        assert_eq!(sniff(&[0x08, 0x07, 0x12, 0x04]), Some(ModelFormat::Onnx));
        assert_eq!(sniff(b"\x02\x00\x00\x00\x00\x00\x00\x00{}"), Some(ModelFormat::Safetensors));
        assert_eq!(sniff(b"PK\x03\x04"), None);
        assert_eq!(sniff(b"GG"), None);
    }

    #[test]
    fn test_unknown_blob_sniffed() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "blob", b"GGUF\x03\x00\x00\x00\x05\x00\x00\x00\x00\x00\x00\x00");
        assert_eq!(FormatDetector::new().detect(&path), Some(ModelFormat::Gguf));
    }

    #[test]
    fn test_no_signal_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "notes.txt", b"hello world, not a model");
        assert_eq!(FormatDetector::new().detect(&path), None);
        assert_eq!(FormatDetector::new().detect(tmp.path().join("missing.bin")), None);
    }

    #[test]
    fn test_primary_artifact_in_bundle() {
        let tmp = TempDir::new().unwrap();
        let voice = tmp.path().join("voice");
        fs::create_dir_all(voice.join("espeak")).unwrap();
        write(&voice, "tokens.txt", b"a b c");
        write(&voice, "model.int8.onnx", &[0x08; 64]);
        let main = write(&voice, "model.onnx", &[0x08; 256]);
        write(&voice.join("espeak"), "phon.onnx", &[0x08; 16]);

        assert_eq!(primary_artifact(&voice, ModelFormat::Onnx), Some(main.clone()));
        assert_eq!(primary_artifact(&main, ModelFormat::Onnx), Some(main));
        assert_eq!(primary_artifact(&voice, ModelFormat::Gguf), None);
    }

    #[test]
    fn test_primary_artifact_keeps_packages_whole() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config.json", b"{}");
        write(tmp.path(), "model.safetensors", b"x");
        assert_eq!(
            primary_artifact(tmp.path(), ModelFormat::Safetensors),
            Some(tmp.path().to_path_buf())
        );

        let bundle = tmp.path().join("Tiny.mlmodelc");
        fs::create_dir_all(&bundle).unwrap();
        write(&bundle, "model.mil", b"program");
        assert_eq!(primary_artifact(&bundle, ModelFormat::CoreMl), Some(bundle.clone()));
        assert_eq!(primary_artifact(tmp.path(), ModelFormat::CoreMl), Some(bundle));
    }

    #[test]
    fn test_directory_package() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config.json", b"{}");
        write(tmp.path(), "model-00001-of-00002.safetensors", b"x");
        assert_eq!(
            FormatDetector::new().detect(tmp.path()),
            Some(ModelFormat::Safetensors)
        );
    }
}
