//! Safetensors validation for single files and packaged directories.

use super::shards::{group_shards, validate_shard_completeness};
use super::{read_prefix, FormatValidator};
use crate::config::ValidationConfig;
use crate::models::ModelFormat;
use crate::validation::detector::extension_of;
use crate::validation::types::{Findings, ValidationError, WarningSeverity};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin"];
const INDEX_SUFFIX: &str = ".safetensors.index.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsValidator;

impl SafetensorsValidator {
    fn validate_directory(&self, dir: &Path) -> Findings {
        let mut findings = Findings::default();
        let files: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect(),
            Err(e) => {
                findings.error(ValidationError::corrupted(format!(
                    "unreadable model directory: {}",
                    e
                )));
                return findings;
            }
        };

        let mut missing = Vec::new();
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.is_file() {
            missing.push(CONFIG_FILE.to_string());
        }

        let weights: Vec<PathBuf> = files
            .iter()
            .filter(|p| WEIGHT_EXTENSIONS.contains(&extension_of(p).as_str()))
            .cloned()
            .collect();
        if weights.is_empty() {
            missing.push("*.safetensors".to_string());
        }

        for (base, shards) in group_shards(&weights) {
            let check = validate_shard_completeness(&shards);
            if let Some(error) = check.error {
                findings.error(ValidationError::corrupted(format!("{}: {}", base, error)));
            }
            missing.extend(check.missing_shards.iter().map(|i| {
                shard_name(&base, *i, check.total_shards)
            }));
            let unlisted = check.missing_count.saturating_sub(check.missing_shards.len());
            if unlisted > 0 {
                missing.push(format!("{} more shard(s) of {}", unlisted, base));
            }
        }

        let mut unindexed = self.missing_from_index(dir, &files);
        if unindexed.len() > ValidationConfig::MAX_REPORTED_MISSING {
            let extra = unindexed.len() - ValidationConfig::MAX_REPORTED_MISSING;
            unindexed.truncate(ValidationConfig::MAX_REPORTED_MISSING);
            unindexed.push(format!("{} more indexed file(s)", extra));
        }
        missing.extend(unindexed);

        if !missing.is_empty() {
            findings.error(ValidationError::MissingRequiredFiles { files: missing });
        }

        if config_path.is_file() {
            let parsed = fs::read_to_string(&config_path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(value) if value.is_object() => {}
                Ok(_) => findings.error(ValidationError::InvalidMetadata {
                    reason: format!("{} is not a JSON object", CONFIG_FILE),
                }),
                Err(reason) => findings.error(ValidationError::InvalidMetadata {
                    reason: format!("{} does not parse: {}", CONFIG_FILE, reason),
                }),
            }
        }

        findings
    }

    /// Files named by a `*.safetensors.index.json` weight map that are absent.
    fn missing_from_index(&self, dir: &Path, files: &[PathBuf]) -> Vec<String> {
        let mut referenced = BTreeSet::new();
        for index in files.iter().filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(INDEX_SUFFIX))
        }) {
            let Ok(contents) = fs::read_to_string(index) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) else {
                continue;
            };
            if let Some(map) = value.get("weight_map").and_then(|m| m.as_object()) {
                referenced.extend(map.values().filter_map(|v| v.as_str()).map(String::from));
            }
        }
        referenced
            .into_iter()
            .filter(|name| !dir.join(name).is_file())
            .collect()
    }

    fn validate_file(&self, path: &Path) -> Findings {
        let mut findings = Findings::default();

        let extension = extension_of(path);
        if extension != "safetensors" {
            findings.error(ValidationError::invalid_format(".safetensors extension", format!(".{}", extension)));
        }

        let file_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                findings.error(ValidationError::corrupted(format!("unreadable safetensors file: {}", e)));
                return findings;
            }
        };
        let header = match read_prefix(path, 9) {
            Ok(header) => header,
            Err(e) => {
                findings.error(ValidationError::corrupted(format!("unreadable safetensors file: {}", e)));
                return findings;
            }
        };
        findings.extend(self.check_header(&header, file_len));
        findings
    }

    /// Check the leading 8-byte header-length field (plus the first JSON byte when present).
    pub fn check_header(&self, header: &[u8], file_len: u64) -> Findings {
        let mut findings = Findings::default();
        if header.len() < 8 {
            findings.error(ValidationError::corrupted(format!(
                "safetensors file is only {} bytes",
                header.len()
            )));
            return findings;
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[..8]);
        let header_len = u64::from_le_bytes(len_bytes);
        if header_len == 0
            || header_len > ValidationConfig::SAFETENSORS_MAX_HEADER
            || header_len > file_len.saturating_sub(8)
        {
            findings.error(ValidationError::corrupted(format!(
                "implausible safetensors header length {} for a {} byte file",
                header_len, file_len
            )));
        } else if header.get(8).is_some_and(|b| *b != b'{') {
            findings.warn(
                "header_not_json",
                "safetensors header does not start with a JSON object",
                WarningSeverity::Medium,
            );
        }
        findings
    }
}

impl FormatValidator for SafetensorsValidator {
    fn format(&self) -> ModelFormat {
        ModelFormat::Safetensors
    }

    fn validate(&self, path: &Path) -> Findings {
        if path.is_dir() {
            self.validate_directory(path)
        } else {
            self.validate_file(path)
        }
    }
}

/// `model.safetensors` + 3 of 5 → `model-00003-of-00005.safetensors`
fn shard_name(base: &str, index: usize, total: usize) -> String {
    let (stem, ext) = base.rsplit_once('.').unwrap_or((base, ""));
    format!("{}-{:05}-of-{:05}.{}", stem, index, total, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn single_file(dir: &Path, name: &str, json: &str) -> PathBuf {
        let mut bytes = (json.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(json.as_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_valid_single_file() {
        let tmp = TempDir::new().unwrap();
        let path = single_file(tmp.path(), "model.safetensors", r#"{"w":{}}"#);
        let findings = SafetensorsValidator.validate(&path);
        assert!(findings.is_clean(), "{:?}", findings);
    }

    #[test]
    fn test_wrong_extension() {
        let tmp = TempDir::new().unwrap();
        let path = single_file(tmp.path(), "model.bin", r#"{"w":{}}"#);
        let findings = SafetensorsValidator.validate(&path);
        assert!(matches!(findings.errors[..], [ValidationError::InvalidFormat { .. }]));
    }

    #[test]
    fn test_header_longer_than_file() {
        let findings = SafetensorsValidator.check_header(&1_000u64.to_le_bytes(), 100);
        assert!(matches!(findings.errors[..], [ValidationError::CorruptedFile { .. }]));
    }

    #[test]
    fn test_directory_requires_config_and_weights() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("tokenizer.json"), "{}").unwrap();

        let findings = SafetensorsValidator.validate(tmp.path());
        assert_eq!(
            findings.errors,
            vec![ValidationError::MissingRequiredFiles {
                files: vec!["config.json".into(), "*.safetensors".into()]
            }]
        );
    }

    #[test]
    fn test_directory_with_bad_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), "{ nope").unwrap();
        single_file(tmp.path(), "model.safetensors", "{}");

        let findings = SafetensorsValidator.validate(tmp.path());
        assert!(matches!(findings.errors[..], [ValidationError::InvalidMetadata { .. }]));
    }

    #[test]
    fn test_directory_with_missing_shard() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), r#"{"model_type":"llama"}"#).unwrap();
        single_file(tmp.path(), "model-00001-of-00002.safetensors", "{}");

        let findings = SafetensorsValidator.validate(tmp.path());
        assert_eq!(
            findings.errors,
            vec![ValidationError::MissingRequiredFiles {
                files: vec!["model-00002-of-00002.safetensors".into()]
            }]
        );
    }

    #[test]
    fn test_directory_index_references() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), "{}").unwrap();
        single_file(tmp.path(), "a.safetensors", "{}");
        fs::write(
            tmp.path().join("model.safetensors.index.json"),
            r#"{"weight_map":{"x":"a.safetensors","y":"b.safetensors"}}"#,
        )
        .unwrap();

        let findings = SafetensorsValidator.validate(tmp.path());
        assert_eq!(
            findings.errors,
            vec![ValidationError::MissingRequiredFiles {
                files: vec!["b.safetensors".into()]
            }]
        );
    }

    #[test]
    fn test_implausible_shard_count_is_corruption() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), "{}").unwrap();
        single_file(tmp.path(), "model-00001-of-3000000.safetensors", "{}");

        let findings = SafetensorsValidator.validate(tmp.path());
        assert_eq!(findings.errors.len(), 1, "{:?}", findings.errors);
        assert!(matches!(findings.errors[0], ValidationError::CorruptedFile { .. }));
    }

    #[test]
    fn test_large_gap_reports_bounded_list() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), "{}").unwrap();
        single_file(tmp.path(), "model-00001-of-09000.safetensors", "{}");

        let findings = SafetensorsValidator.validate(tmp.path());
        let [ValidationError::MissingRequiredFiles { files }] = &findings.errors[..] else {
            panic!("unexpected errors: {:?}", findings.errors);
        };
        assert_eq!(files.len(), ValidationConfig::MAX_REPORTED_MISSING + 1);
        assert_eq!(files.last().map(String::as_str), Some("8967 more shard(s) of model.safetensors"));
    }

    #[test]
    fn test_shard_name() {
        assert_eq!(shard_name("model.safetensors", 3, 5), "model-00003-of-00005.safetensors");
    }
}
