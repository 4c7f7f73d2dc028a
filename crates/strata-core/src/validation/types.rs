//! Verdict, error and warning types produced by validation.

use crate::models::ModelFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Fatal validation finding. Collected into a verdict, never thrown alone.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Corrupted file: {reason}")]
    CorruptedFile { reason: String },

    #[error("Invalid format: expected {expected}, found {actual}")]
    InvalidFormat { expected: String, actual: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Incompatible version: requires {required}, found {found}")]
    IncompatibleVersion { required: String, found: String },

    #[error("Missing required files: {}", .files.join(", "))]
    MissingRequiredFiles { files: Vec<String> },

    #[error("Missing dependencies: {}", .dependencies.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", "))]
    MissingDependencies { dependencies: Vec<MissingDependency> },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },
}

impl ValidationError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        ValidationError::CorruptedFile {
            reason: reason.into(),
        }
    }

    pub fn invalid_format(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Warning severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Info,
    Low,
    Medium,
    High,
}

/// Advisory finding; never fails a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub severity: WarningSeverity,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: WarningSeverity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.code, self.message)
    }
}

/// What kind of companion a missing dependency is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Tokenizer,
    Backend,
    CompanionFile,
    PairedModel,
}

/// A companion artifact that could not be found or resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub kind: DependencyKind,
    pub name: String,
    pub reason: String,
}

/// Best-effort information read from a model's headers or config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub format: Option<ModelFormat>,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub context_length: Option<u64>,
    pub tensor_count: Option<u64>,
    pub min_memory_bytes: Option<u64>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Errors and warnings produced by one check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl Findings {
    pub fn error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>, severity: WarningSeverity) {
        self.warnings.push(ValidationWarning::new(code, message, severity));
    }

    pub fn extend(&mut self, other: Findings) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Aggregated outcome of every validation check for one model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    /// Sorted most severe first.
    pub warnings: Vec<ValidationWarning>,
    pub metadata: Option<ModelMetadata>,
}

impl ValidationVerdict {
    /// Build a verdict; validity is derived from the error list.
    pub fn from_findings(findings: Findings, metadata: Option<ModelMetadata>) -> Self {
        let Findings { errors, mut warnings } = findings;
        // Stable sort keeps check order within one severity.
        warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            metadata,
        }
    }

    pub fn has_error(&self, predicate: impl Fn(&ValidationError) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_validity_follows_errors() {
        let mut findings = Findings::default();
        findings.warn("size_mismatch", "off by one", WarningSeverity::Medium);
        let verdict = ValidationVerdict::from_findings(findings.clone(), None);
        assert!(verdict.is_valid);

        findings.error(ValidationError::corrupted("truncated"));
        let verdict = ValidationVerdict::from_findings(findings, None);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.errors.len(), 1);
    }

    #[test]
    fn test_warnings_sorted_by_severity() {
        let mut findings = Findings::default();
        findings.warn("a", "info", WarningSeverity::Info);
        findings.warn("b", "high", WarningSeverity::High);
        findings.warn("c", "low", WarningSeverity::Low);

        let verdict = ValidationVerdict::from_findings(findings, None);
        let codes: Vec<_> = verdict.warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_missing_files_message() {
        let err = ValidationError::MissingRequiredFiles {
            files: vec!["config.json".into(), "*.safetensors".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required files: config.json, *.safetensors"
        );
    }
}
