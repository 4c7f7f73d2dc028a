//! GGUF header validation.
//!
//! Header layout:
//! - 0..4: magic `GGUF`
//! - 4..8: version (u32, little-endian)
//! - 8..16: tensor count (u64, little-endian)

use super::{read_prefix, FormatValidator};
use crate::config::ValidationConfig;
use crate::models::ModelFormat;
use crate::validation::detector::magic;
use crate::validation::types::{Findings, ValidationError};
use std::path::Path;

const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct GgufValidator;

impl GgufValidator {
    /// Validate the fixed-size GGUF header held in `header`.
    pub fn check_header(&self, header: &[u8]) -> Findings {
        let mut findings = Findings::default();

        if header.len() < 4 || &header[..4] != magic::GGUF {
            findings.error(ValidationError::invalid_format(
                "GGUF magic",
                describe_magic(header),
            ));
            return findings;
        }
        if header.len() < HEADER_LEN {
            findings.error(ValidationError::corrupted(format!(
                "GGUF header truncated at {} bytes",
                header.len()
            )));
            return findings;
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if !(ValidationConfig::GGUF_MIN_VERSION..=ValidationConfig::GGUF_MAX_VERSION)
            .contains(&version)
        {
            findings.error(ValidationError::IncompatibleVersion {
                required: format!(
                    "GGUF v{}-v{}",
                    ValidationConfig::GGUF_MIN_VERSION,
                    ValidationConfig::GGUF_MAX_VERSION
                ),
                found: format!("GGUF v{}", version),
            });
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[8..16]);
        let tensor_count = u64::from_le_bytes(count_bytes);
        if tensor_count == 0 || tensor_count >= ValidationConfig::GGUF_MAX_TENSORS {
            findings.error(ValidationError::corrupted(format!(
                "implausible GGUF tensor count {}",
                tensor_count
            )));
        }

        findings
    }
}

impl FormatValidator for GgufValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::Gguf
    }

    fn validate(&self, path: &Path) -> Findings {
        match read_prefix(path, HEADER_LEN) {
            Ok(header) => self.check_header(&header),
            Err(e) => {
                let mut findings = Findings::default();
                findings.error(ValidationError::corrupted(format!("unreadable GGUF file: {}", e)));
                findings
            }
        }
    }
}

/// Printable rendering of the first four bytes for error messages.
pub(crate) fn describe_magic(header: &[u8]) -> String {
    let prefix = &header[..header.len().min(4)];
    if prefix.iter().all(|b| b.is_ascii_graphic()) && !prefix.is_empty() {
        String::from_utf8_lossy(prefix).to_string()
    } else {
        format!("0x{}", hex::encode(prefix))
    }
}
