//! Protobuf graph (ONNX) validation.

use super::{read_prefix, FormatValidator};
use crate::config::ValidationConfig;
use crate::models::ModelFormat;
use crate::validation::detector::magic;
use crate::validation::types::{Findings, ValidationError, WarningSeverity};
use std::path::Path;

/// Producer or domain strings that normally appear near the start of a graph.
const MARKERS: &[&[u8]] = &[b"onnx", b"pytorch", b"tf2onnx", b"skl2onnx"];

#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxValidator;

impl OnnxValidator {
    /// `window` is the leading slice of the file, `file_len` its full size.
    pub fn check_header(&self, window: &[u8], file_len: u64) -> Findings {
        let mut findings = Findings::default();

        if file_len < ValidationConfig::ONNX_MIN_SIZE || window.is_empty() {
            findings.error(ValidationError::corrupted(format!(
                "protobuf graph is only {} bytes",
                file_len
            )));
            return findings;
        }

        if !magic::PROTOBUF_TAGS.contains(&window[0]) {
            findings.error(ValidationError::invalid_format(
                "protobuf field tag 0x08 or 0x0a",
                format!("0x{:02x}", window[0]),
            ));
        }

        let lowered = window.to_ascii_lowercase();
        let has_marker = MARKERS
            .iter()
            .any(|marker| lowered.windows(marker.len()).any(|w| w == *marker));
        if !has_marker {
            findings.warn(
                "missing_onnx_marker",
                "no ONNX producer or domain string in the file header",
                WarningSeverity::Low,
            );
        }

        findings
    }
}

impl FormatValidator for OnnxValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::Onnx
    }

    fn validate(&self, path: &Path) -> Findings {
        let result = std::fs::metadata(path).and_then(|meta| {
            read_prefix(path, ValidationConfig::ONNX_MARKER_WINDOW).map(|w| (w, meta.len()))
        });
        match result {
            Ok((window, len)) => self.check_header(&window, len),
            Err(e) => {
                let mut findings = Findings::default();
                findings.error(ValidationError::corrupted(format!("unreadable ONNX file: {}", e)));
                findings
            }
        }
    }
}
