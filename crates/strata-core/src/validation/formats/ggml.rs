//! Legacy GGML container check. Only the magic is verified; the headers of
//! the pre-GGUF revisions differ too much to say more.

use super::{read_prefix, FormatValidator};
use crate::models::ModelFormat;
use crate::validation::detector::magic;
use crate::validation::formats::gguf::describe_magic;
use crate::validation::types::{Findings, ValidationError, WarningSeverity};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct GgmlValidator;

impl GgmlValidator {
    pub fn check_header(&self, header: &[u8]) -> Findings {
        let mut findings = Findings::default();
        if header.len() < 4 || !magic::GGML.iter().any(|m| &header[..4] == *m) {
            findings.error(ValidationError::invalid_format(
                "GGML magic",
                describe_magic(header),
            ));
            return findings;
        }
        findings.warn(
            "legacy_format",
            "GGML is superseded by GGUF; most current runtimes refuse it",
            WarningSeverity::Medium,
        );
        findings
    }
}

impl FormatValidator for GgmlValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::Ggml
    }

    fn validate(&self, path: &Path) -> Findings {
        match read_prefix(path, 8) {
            Ok(header) => self.check_header(&header),
            Err(e) => {
                let mut findings = Findings::default();
                findings.error(ValidationError::corrupted(format!("unreadable GGML file: {}", e)));
                findings
            }
        }
    }
}
