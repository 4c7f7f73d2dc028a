//! Managed-runtime packages (`.mlmodel`, `.mlmodelc`, `.mlpackage`).
//!
//! These formats can only be verified by asking the host's model-loading
//! runtime to compile and instantiate them. The runtime is injected; hosts
//! without one get an `InvalidFormat` error instead of a crash.

use super::FormatValidator;
use crate::models::ModelFormat;
use crate::validation::detector::extension_of;
use crate::validation::types::{Findings, ValidationError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Classified failure from a managed runtime load attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeLoadError {
    #[error("model package is corrupt: {0}")]
    Corrupt(String),

    #[error("unsupported specification version: requires {required}, found {found}")]
    UnsupportedVersion { required: String, found: String },

    #[error("compilation failed: {0}")]
    CompileFailed(String),

    #[error("input/output description is invalid: {0}")]
    BadIoSpec(String),
}

/// Host model-loading API.
pub trait ManagedRuntime: Send + Sync {
    /// Runtime name for diagnostics.
    fn name(&self) -> &str;

    /// Compile `path` if it needs it, then instantiate it once and drop it.
    fn load(&self, path: &Path) -> Result<(), RuntimeLoadError>;
}

/// Manifest files whose absence means the package cannot be loaded at all.
fn required_entries(extension: &str) -> &'static [&'static str] {
    match extension {
        "mlpackage" => &["Manifest.json"],
        "mlmodelc" => &["coremldata.bin"],
        _ => &[],
    }
}

pub struct CoreMlValidator {
    runtime: Option<Arc<dyn ManagedRuntime>>,
}

impl CoreMlValidator {
    pub fn new(runtime: Option<Arc<dyn ManagedRuntime>>) -> Self {
        Self { runtime }
    }
}

impl FormatValidator for CoreMlValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::CoreMl
    }

    fn validate(&self, path: &Path) -> Findings {
        let mut findings = Findings::default();
        let Some(runtime) = &self.runtime else {
            findings.error(ValidationError::invalid_format(
                "host with a managed model runtime",
                "no managed runtime available on this platform",
            ));
            return findings;
        };

        if path.is_dir() {
            let missing: Vec<String> = required_entries(&extension_of(path))
                .iter()
                .filter(|name| !path.join(name).exists())
                .map(|name| name.to_string())
                .collect();
            if !missing.is_empty() {
                findings.error(ValidationError::MissingRequiredFiles { files: missing });
                return findings;
            }
        }

        debug!(runtime = runtime.name(), path = %path.display(), "Loading model through managed runtime");
        if let Err(err) = runtime.load(path) {
            findings.error(classify(err));
        }
        findings
    }
}

fn classify(err: RuntimeLoadError) -> ValidationError {
    match err {
        RuntimeLoadError::Corrupt(reason) => ValidationError::corrupted(reason),
        RuntimeLoadError::UnsupportedVersion { required, found } => {
            ValidationError::IncompatibleVersion { required, found }
        }
        RuntimeLoadError::CompileFailed(reason) => {
            ValidationError::corrupted(format!("compilation failed: {}", reason))
        }
        RuntimeLoadError::BadIoSpec(reason) => ValidationError::InvalidMetadata {
            reason: format!("input/output description: {}", reason),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedRuntime(Option<RuntimeLoadError>);

    impl ManagedRuntime for FixedRuntime {
        fn name(&self) -> &str {
            "fixed"
        }

        fn load(&self, _path: &Path) -> Result<(), RuntimeLoadError> {
            match &self.0 {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    fn validator(result: Option<RuntimeLoadError>) -> CoreMlValidator {
        CoreMlValidator::new(Some(Arc::new(FixedRuntime(result))))
    }

    #[test]
    fn test_no_runtime_is_invalid_format() {
        let findings = CoreMlValidator::new(None).validate(Path::new("/m/model.mlmodel"));
        assert!(matches!(findings.errors[..], [ValidationError::InvalidFormat { .. }]));
    }

    #[test]
    fn test_load_errors_are_classified() {
        let path = Path::new("/m/model.mlmodel");
        let cases = [
            (RuntimeLoadError::Corrupt("bad".into()), "CorruptedFile"),
            (
                RuntimeLoadError::UnsupportedVersion {
                    required: "7".into(),
                    found: "9".into(),
                },
                "IncompatibleVersion",
            ),
            (RuntimeLoadError::CompileFailed("mil".into()), "CorruptedFile"),
            (RuntimeLoadError::BadIoSpec("shape".into()), "InvalidMetadata"),
        ];
        for (err, expected) in cases {
            let findings = validator(Some(err)).validate(path);
            assert_eq!(findings.errors.len(), 1);
            assert!(format!("{:?}", findings.errors[0]).starts_with(expected));
        }
    }

    #[test]
    fn test_package_without_manifest() {
        let tmp = TempDir::new().unwrap();
        let package = tmp.path().join("model.mlpackage");
        std::fs::create_dir(&package).unwrap();

        let findings = validator(None).validate(&package);
        assert_eq!(
            findings.errors,
            vec![ValidationError::MissingRequiredFiles {
                files: vec!["Manifest.json".into()]
            }]
        );

        std::fs::write(package.join("Manifest.json"), "{}").unwrap();
        assert!(validator(None).validate(&package).is_clean());
    }
}
