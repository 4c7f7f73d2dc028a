//! Integration tests for format fingerprints, checksums and the coordinator.

use proptest::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use strata_core::platform::HostProbe;
use strata_core::validation::formats::{GgufValidator, TfLiteValidator, ValidatorTable};
use strata_core::validation::{DependencyChecker, HeaderMetadataExtractor};
use strata_core::{
    BackendRegistry, ChecksumAlgorithm, ChecksumValidator, ExpectedChecksum, ModelDescriptor,
    ModelFormat, TokenizerRegistry, ValidationCoordinator, ValidationError,
};
use tempfile::TempDir;

fn gguf_header(version: u32, tensor_count: u64) -> Vec<u8> {
    let mut bytes = b"GGUF".to_vec();
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&tensor_count.to_le_bytes());
    bytes
}

proptest! {
    #[test]
    fn prop_gguf_v3_with_tensors_is_clean(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut bytes = gguf_header(3, 5);
        bytes.extend(tail);
        prop_assert!(GgufValidator.check_header(&bytes).errors.is_empty());
    }

    #[test]
    fn prop_gguf_unsupported_version_single_error(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut bytes = gguf_header(5, 5);
        bytes.extend(tail);
        let errors = GgufValidator.check_header(&bytes).errors;
        prop_assert_eq!(errors.len(), 1);
        prop_assert!(matches!(errors[0], ValidationError::IncompatibleVersion { .. }), "{:?}", errors);
    }

    #[test]
    fn prop_gguf_zero_tensors_single_error(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut bytes = gguf_header(3, 0);
        bytes.extend(tail);
        let errors = GgufValidator.check_header(&bytes).errors;
        prop_assert_eq!(errors.len(), 1);
        prop_assert!(matches!(errors[0], ValidationError::CorruptedFile { .. }), "{:?}", errors);
    }

    #[test]
    fn prop_tflite_wrong_identifier_single_error(
        bytes in proptest::collection::vec(any::<u8>(), 8..128)
    ) {
        prop_assume!(&bytes[4..8] != b"TFL3");
        let len = bytes.len() as u64;
        let errors = TfLiteValidator.check_header(&bytes, Some(len)).errors;
        prop_assert_eq!(errors.len(), 1);
        prop_assert!(matches!(errors[0], ValidationError::InvalidFormat { .. }), "{:?}", errors);
    }

    #[test]
    fn prop_checksum_roundtrip(content in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        fs::write(&path, &content).unwrap();
        let validator = ChecksumValidator::new();

        for algorithm in ChecksumAlgorithm::ALL {
            let digest = validator.calculate(&path, algorithm).unwrap();
            prop_assert!(validator.validate(&path, &digest, algorithm).unwrap());
        }
    }
}

struct Roomy;

impl HostProbe for Roomy {
    fn available_memory(&self) -> Option<u64> {
        Some(u64::MAX)
    }

    fn os_version(&self) -> Option<String> {
        Some("14.0".into())
    }
}

fn coordinator(models_dir: &Path) -> ValidationCoordinator {
    ValidationCoordinator::new(
        ValidatorTable::with_defaults(None),
        DependencyChecker::new(
            Arc::new(BackendRegistry::new()),
            Arc::new(TokenizerRegistry::new()),
            models_dir,
        ),
        Arc::new(HeaderMetadataExtractor),
        Arc::new(Roomy),
    )
}

#[test]
fn test_checksum_mismatch_is_not_masked() {
    let tmp = TempDir::new().unwrap();
    let mut bytes = gguf_header(3, 5);
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.resize(1000, 0);
    let path = tmp.path().join("model.gguf");
    fs::write(&path, &bytes).unwrap();

    let descriptor = ModelDescriptor {
        expected_size: Some(1000),
        checksum: Some(ExpectedChecksum {
            algorithm: ChecksumAlgorithm::Sha256,
            value: "0".repeat(64),
        }),
        ..ModelDescriptor::new("tiny", "Tiny", ModelFormat::Gguf)
    };

    let verdict = coordinator(tmp.path()).validate_model(&descriptor, &path);
    assert!(!verdict.is_valid);
    assert_eq!(verdict.errors.len(), 1, "{:?}", verdict.errors);
    assert!(matches!(
        verdict.errors[0],
        ValidationError::ChecksumMismatch { .. }
    ));
}

#[test]
fn test_missing_artifact_reports_missing_files() {
    let tmp = TempDir::new().unwrap();
    let descriptor = ModelDescriptor::new("gone", "Gone", ModelFormat::Onnx);
    let verdict = coordinator(tmp.path()).validate_model(&descriptor, &tmp.path().join("gone.onnx"));
    assert!(!verdict.is_valid);
    assert!(verdict.has_error(|e| matches!(e, ValidationError::MissingRequiredFiles { .. })));
}
