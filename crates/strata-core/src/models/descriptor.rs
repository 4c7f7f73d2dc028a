use crate::error::{Result, StrataError};
use crate::models::ModelFormat;
use crate::validation::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};

/// Input/output modality a model serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    TextGeneration,
    Embedding,
    SpeechToText,
    TextToSpeech,
    Vision,
}

/// Declared checksum for a model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedChecksum {
    pub algorithm: ChecksumAlgorithm,
    /// Hex digest; compared case-insensitively.
    pub value: String,
}

/// Minimum host capabilities declared by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareRequirements {
    #[serde(default)]
    pub min_memory_bytes: Option<u64>,
    /// Semver-ish OS version, e.g. `"14.0"`.
    #[serde(default)]
    pub min_os_version: Option<String>,
}

/// Immutable catalog record describing one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub format: ModelFormat,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub expected_size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<ExpectedChecksum>,
    #[serde(default)]
    pub tokenizer_family: Option<String>,
    /// Backend keys that can execute this model.
    #[serde(default)]
    pub compatible_backends: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requirements: HardwareRequirements,
    #[serde(default = "default_modality")]
    pub modality: Modality,
    /// The artifact already sits on local storage; download is skipped.
    #[serde(default)]
    pub is_local: bool,
    /// The downloaded artifact is an archive that must be extracted.
    #[serde(default)]
    pub is_archive: bool,
}

fn default_modality() -> Modality {
    Modality::TextGeneration
}

impl ModelDescriptor {
    /// Minimal descriptor; the remaining fields are set with struct update syntax.
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: ModelFormat) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format,
            download_url: None,
            expected_size: None,
            checksum: None,
            tokenizer_family: None,
            compatible_backends: Vec::new(),
            tags: Vec::new(),
            requirements: HardwareRequirements::default(),
            modality: default_modality(),
            is_local: false,
            is_archive: false,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Filesystem-safe form of the id, used for directory and file names.
    pub fn storage_key(&self) -> String {
        sanitize_id(&self.id)
    }
}

/// Hex digits of the id digest appended to every storage key.
const KEY_DIGEST_LEN: usize = 12;

/// Reject ids that cannot name a model: empty, blank, or only dots.
pub fn check_model_id(id: &str) -> Result<()> {
    let trimmed = id.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return Err(StrataError::InvalidModelId {
            model_id: id.to_string(),
        });
    }
    Ok(())
}

/// Filesystem-safe, collision-free key for a model id.
///
/// Unsafe characters become `_` and leading dots are dropped; a short
/// BLAKE3 digest of the raw id keeps ids such as `org/tiny` and `org_tiny`
/// apart. The key is never empty and never `.` or `..`.
pub(crate) fn sanitize_id(id: &str) -> String {
    let readable: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    let readable = match readable.trim_start_matches('.') {
        "" => "model",
        rest => rest,
    };
    let digest = blake3::hash(id.as_bytes()).to_hex();
    format!("{}-{}", readable, &digest[..KEY_DIGEST_LEN])
}
