//! Mobile interpreter (flatbuffer) header validation.
//!
//! A flatbuffer starts with the u32 offset of its root table, followed by
//! the 4-byte file identifier `TFL3`.

use super::{read_prefix, FormatValidator};
use crate::models::ModelFormat;
use crate::validation::detector::magic;
use crate::validation::types::{Findings, ValidationError, WarningSeverity};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct TfLiteValidator;

impl TfLiteValidator {
    /// `file_len` bounds the root table offset when known.
    pub fn check_header(&self, header: &[u8], file_len: Option<u64>) -> Findings {
        let mut findings = Findings::default();

        if header.len() < 8 || &header[4..8] != magic::TFLITE {
            let actual = if header.len() < 8 {
                format!("{} byte file", header.len())
            } else {
                String::from_utf8_lossy(&header[4..8]).to_string()
            };
            findings.error(ValidationError::invalid_format("TFL3 identifier", actual));
            return findings;
        }

        let root_offset = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let out_of_bounds = file_len.is_some_and(|len| root_offset >= len);
        if root_offset < 8 || root_offset % 4 != 0 || out_of_bounds {
            findings.warn(
                "unrecognized_root_offset",
                format!("unexpected flatbuffer root offset {}", root_offset),
                WarningSeverity::Low,
            );
        }

        findings
    }
}

impl FormatValidator for TfLiteValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::TfLite
    }

    fn validate(&self, path: &Path) -> Findings {
        let file_len = std::fs::metadata(path).ok().map(|m| m.len());
        match read_prefix(path, 8) {
            Ok(header) => self.check_header(&header, file_len),
            Err(e) => {
                let mut findings = Findings::default();
                findings.error(ValidationError::corrupted(format!("unreadable TFLite file: {}", e)));
                findings
            }
        }
    }
}
