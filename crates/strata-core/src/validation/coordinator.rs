//! Orchestrates every validation check into one verdict per model.
//!
//! Checks never short-circuit each other: a checksum mismatch does not stop
//! the format validator from running, so callers get the whole picture in a
//! single pass. Only checks that need the artifact's bytes are skipped when
//! the artifact is missing.

use super::checksum::ChecksumValidator;
use super::dependencies::DependencyChecker;
use super::detector::{primary_artifact, FormatDetector};
use super::formats::ValidatorTable;
use super::metadata::MetadataExtractor;
use super::types::{Findings, ModelMetadata, ValidationError, ValidationVerdict, WarningSeverity};
use crate::error::{Result, StrataError};
use crate::models::ModelDescriptor;
use crate::platform::HostProbe;
use crate::storage::artifact_size;
use semver::Version;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs existence, size, checksum, format, dependency, metadata, structural
/// and hardware checks against an installed artifact.
#[derive(Clone)]
pub struct ValidationCoordinator {
    detector: FormatDetector,
    checksums: ChecksumValidator,
    validators: ValidatorTable,
    dependencies: DependencyChecker,
    extractor: Arc<dyn MetadataExtractor>,
    host: Arc<dyn HostProbe>,
}

impl ValidationCoordinator {
    pub fn new(
        validators: ValidatorTable,
        dependencies: DependencyChecker,
        extractor: Arc<dyn MetadataExtractor>,
        host: Arc<dyn HostProbe>,
    ) -> Self {
        Self {
            detector: FormatDetector::new(),
            checksums: ChecksumValidator::new(),
            validators,
            dependencies,
            extractor,
            host,
        }
    }

    /// Validate the artifact at `path` against `descriptor`.
    ///
    /// `path` may be an unpacked package; byte-level checks then run on the
    /// primary artifact inside it (see [`primary_artifact`]).
    pub fn validate_model(&self, descriptor: &ModelDescriptor, path: &Path) -> ValidationVerdict {
        let mut findings = Findings::default();
        let mut metadata = None;

        let artifact = if path.exists() {
            self.check_size(descriptor, path, &mut findings);
            let artifact = primary_artifact(path, descriptor.format);
            if artifact.is_none() {
                findings.error(ValidationError::MissingRequiredFiles {
                    files: descriptor
                        .format
                        .extensions()
                        .map(|ext| format!("{}/*.{}", path.display(), ext))
                        .collect(),
                });
            }
            artifact
        } else {
            findings.error(ValidationError::MissingRequiredFiles {
                files: vec![path.display().to_string()],
            });
            None
        };

        if let Some(artifact) = &artifact {
            if artifact != path {
                debug!(model_id = %descriptor.id, artifact = %artifact.display(), "Validating packaged artifact");
            }
            self.check_checksum(descriptor, artifact, &mut findings);
            self.check_detected_format(descriptor, artifact, &mut findings);
        }

        let missing = self
            .dependencies
            .check(descriptor, artifact.as_deref().unwrap_or(path));
        if !missing.is_empty() {
            findings.error(ValidationError::MissingDependencies { dependencies: missing });
        }

        if let Some(artifact) = &artifact {
            metadata = self.extract_metadata(descriptor, artifact, &mut findings);
            self.check_structure(descriptor, artifact, &mut findings);
        }

        self.check_hardware(descriptor, &mut findings);

        let verdict = ValidationVerdict::from_findings(findings, metadata);
        info!(
            model_id = %descriptor.id,
            path = %path.display(),
            is_valid = verdict.is_valid,
            errors = verdict.errors.len(),
            warnings = verdict.warnings.len(),
            "Validation finished"
        );
        verdict
    }

    /// [`validate_model`](Self::validate_model) on a blocking thread.
    pub async fn validate_model_async(
        &self,
        descriptor: &ModelDescriptor,
        path: &Path,
    ) -> Result<ValidationVerdict> {
        let coordinator = self.clone();
        let descriptor = descriptor.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || coordinator.validate_model(&descriptor, &path))
            .await
            .map_err(|e| StrataError::Other(format!("Validation task failed: {}", e)))
    }

    /// The declared size of an archive describes the download, not what it unpacks to.
    fn check_size(&self, descriptor: &ModelDescriptor, path: &Path, findings: &mut Findings) {
        let Some(expected) = descriptor.expected_size.filter(|_| !descriptor.is_archive) else {
            return;
        };
        let actual = artifact_size(path);
        if actual != expected {
            findings.warn(
                "size_mismatch",
                format!("declared size {} bytes, found {} bytes", expected, actual),
                WarningSeverity::Medium,
            );
        }
    }

    fn check_checksum(&self, descriptor: &ModelDescriptor, path: &Path, findings: &mut Findings) {
        let Some(expected) = &descriptor.checksum else {
            return;
        };
        if expected.algorithm.is_legacy() {
            findings.warn(
                "legacy_checksum",
                format!("{} is accepted for compatibility only", expected.algorithm),
                WarningSeverity::Low,
            );
        }
        if path.is_dir() {
            findings.warn(
                "checksum_skipped",
                "declared checksum cannot apply to a directory package",
                WarningSeverity::Info,
            );
            return;
        }

        match self.checksums.calculate(path, expected.algorithm) {
            Ok(actual) if super::checksum::digests_match(&actual, &expected.value) => {
                debug!(model_id = %descriptor.id, algorithm = %expected.algorithm, "Checksum verified");
            }
            Ok(actual) => findings.error(ValidationError::ChecksumMismatch {
                expected: expected.value.to_ascii_lowercase(),
                actual,
            }),
            Err(e) => findings.error(ValidationError::corrupted(format!(
                "checksum could not be computed: {}",
                e
            ))),
        }
    }

    fn check_detected_format(&self, descriptor: &ModelDescriptor, path: &Path, findings: &mut Findings) {
        match self.detector.detect(path) {
            Some(detected) if detected != descriptor.format => {
                findings.error(ValidationError::invalid_format(
                    descriptor.format.to_string(),
                    detected.to_string(),
                ));
            }
            Some(_) => {}
            None => findings.warn(
                "format_undetected",
                format!("no {} signature recognised", descriptor.format),
                WarningSeverity::Low,
            ),
        }
    }

    fn extract_metadata(
        &self,
        descriptor: &ModelDescriptor,
        path: &Path,
        findings: &mut Findings,
    ) -> Option<ModelMetadata> {
        match self.extractor.extract(path, Some(descriptor.format)) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                findings.warn(
                    "metadata_unavailable",
                    format!("metadata extraction failed: {}", e),
                    WarningSeverity::Info,
                );
                None
            }
        }
    }

    fn check_structure(&self, descriptor: &ModelDescriptor, path: &Path, findings: &mut Findings) {
        match self.validators.get(descriptor.format) {
            Some(validator) => findings.extend(validator.validate(path)),
            None => findings.warn(
                "no_structural_validator",
                format!("no validator registered for {}", descriptor.format),
                WarningSeverity::Low,
            ),
        }
    }

    fn check_hardware(&self, descriptor: &ModelDescriptor, findings: &mut Findings) {
        let requirements = &descriptor.requirements;

        if let Some(required) = requirements.min_memory_bytes {
            if let Some(available) = self.host.available_memory() {
                if available < required {
                    findings.warn(
                        "insufficient_memory",
                        format!("{} bytes required, {} bytes available", required, available),
                        WarningSeverity::High,
                    );
                }
            }
        }

        if let Some(required) = requirements.min_os_version.as_deref() {
            let host = self.host.os_version();
            match (parse_version(required), host.as_deref().and_then(parse_version)) {
                (Some(min), Some(found)) if found < min => findings.warn(
                    "os_version_too_old",
                    format!("requires OS {}, found {}", required, host.as_deref().unwrap_or_default()),
                    WarningSeverity::High,
                ),
                (Some(_), Some(_)) => {}
                _ => findings.warn(
                    "os_version_unknown",
                    format!("could not compare OS version against {}", required),
                    WarningSeverity::Info,
                ),
            }
        }
    }
}

impl std::fmt::Debug for ValidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationCoordinator")
            .field("validators", &self.validators)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Lenient version parse: `"14"`, `"22.04"`, `"10.0.19045 Build"` all work.
fn parse_version(raw: &str) -> Option<Version> {
    let mut parts = raw
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .take(3)
        .map(|s| s.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}
