//! Completeness checks for sharded weight sets (`model-00001-of-00003.safetensors`).

use crate::config::ValidationConfig;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Captures: (base_name, shard_index, total_count, extension)
static SHARD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-(\d+)-of-(\d+)(\.[^.]+)$").expect("valid shard regex"));

/// Result of shard completeness validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardValidation {
    pub is_complete: bool,
    pub total_shards: usize,
    pub found_shards: Vec<usize>,
    /// Lowest missing indices, at most `MAX_REPORTED_MISSING` of them.
    pub missing_shards: Vec<usize>,
    pub missing_count: usize,
    /// Set when the filenames disagree on the total count or declare an
    /// impossible one.
    pub error: Option<String>,
}

impl ShardValidation {
    fn rejected(total_shards: usize, found: BTreeSet<usize>, error: String) -> Self {
        Self {
            is_complete: false,
            total_shards,
            found_shards: found.into_iter().collect(),
            missing_shards: Vec::new(),
            missing_count: 0,
            error: Some(error),
        }
    }
}

/// Group shard files by `base + extension`. Files without a shard suffix are skipped.
pub fn group_shards(files: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(caps) = SHARD_PATTERN.captures(name) {
            groups
                .entry(format!("{}{}", &caps[1], &caps[4]))
                .or_default()
                .push(path.clone());
        }
    }
    for shard_files in groups.values_mut() {
        shard_files.sort();
    }
    groups
}

/// Validate that a sharded set is complete.
///
/// ```
/// use std::path::PathBuf;
/// use strata_core::validation::formats::validate_shard_completeness;
///
/// let shards = vec![
///     PathBuf::from("model-00001-of-00003.safetensors"),
///     PathBuf::from("model-00002-of-00003.safetensors"),
/// ];
///
/// let result = validate_shard_completeness(&shards);
/// assert!(!result.is_complete);
/// assert_eq!(result.missing_shards, vec![3]);
/// ```
pub fn validate_shard_completeness(shard_files: &[PathBuf]) -> ShardValidation {
    let mut found = BTreeSet::new();
    let mut expected_total: Option<usize> = None;

    for path in shard_files {
        let Some(caps) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| SHARD_PATTERN.captures(n))
        else {
            continue;
        };
        let total = match caps[3].parse::<usize>() {
            Ok(total) if (1..=ValidationConfig::MAX_SHARDS).contains(&total) => total,
            _ => {
                return ShardValidation::rejected(
                    expected_total.unwrap_or(0),
                    found,
                    format!(
                        "Shard count {} outside 1..={}",
                        &caps[3],
                        ValidationConfig::MAX_SHARDS
                    ),
                );
            }
        };
        let index = match caps[2].parse::<usize>() {
            Ok(index) if (1..=total).contains(&index) => index,
            _ => {
                return ShardValidation::rejected(
                    total,
                    found,
                    format!("Shard index {} outside 1..={}", &caps[2], total),
                );
            }
        };

        match expected_total {
            None => expected_total = Some(total),
            Some(existing) if existing != total => {
                found.insert(index);
                return ShardValidation::rejected(
                    existing,
                    found,
                    "Inconsistent shard counts in filenames".to_string(),
                );
            }
            _ => {}
        }
        found.insert(index);
    }

    let Some(total) = expected_total else {
        return ShardValidation {
            is_complete: !shard_files.is_empty(),
            total_shards: shard_files.len(),
            found_shards: (1..=shard_files.len()).collect(),
            missing_shards: Vec::new(),
            missing_count: 0,
            error: None,
        };
    };

    let missing_count = total - found.len();
    let missing: Vec<usize> = (1..=total)
        .filter(|i| !found.contains(i))
        .take(ValidationConfig::MAX_REPORTED_MISSING)
        .collect();
    ShardValidation {
        is_complete: missing_count == 0,
        total_shards: total,
        found_shards: found.into_iter().collect(),
        missing_shards: missing,
        missing_count,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_shards() {
        let files = vec![
            PathBuf::from("/m/model-00002-of-00002.safetensors"),
            PathBuf::from("/m/model-00001-of-00002.safetensors"),
            PathBuf::from("/m/config.json"),
        ];
        let groups = group_shards(&files);
        assert_eq!(groups.len(), 1);
        let shards = &groups["model.safetensors"];
        assert!(shards[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_complete_set() {
        let files = vec![
            PathBuf::from("model-00001-of-00002.safetensors"),
            PathBuf::from("model-00002-of-00002.safetensors"),
        ];
        let result = validate_shard_completeness(&files);
        assert!(result.is_complete);
        assert_eq!(result.found_shards, vec![1, 2]);
    }

    #[test]
    fn test_inconsistent_totals() {
        let files = vec![
            PathBuf::from("model-00001-of-00002.safetensors"),
            PathBuf::from("model-00002-of-00003.safetensors"),
        ];
        let result = validate_shard_completeness(&files);
        assert!(!result.is_complete);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_oversized_total_rejected() {
        for name in [
            "model-00001-of-3000000.safetensors",
            "model-00001-of-18446744073709551615.safetensors",
            "model-00001-of-99999999999999999999999.safetensors",
            "model-00000-of-00000.safetensors",
        ] {
            let result = validate_shard_completeness(&[PathBuf::from(name)]);
            assert!(!result.is_complete, "{}", name);
            assert!(result.error.is_some(), "{}", name);
            assert!(result.missing_shards.is_empty());
        }
    }

    #[test]
    fn test_index_beyond_total_rejected() {
        let result = validate_shard_completeness(&[PathBuf::from("model-00009-of-00002.safetensors")]);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_missing_list_is_truncated() {
        let result = validate_shard_completeness(&[PathBuf::from("model-00001-of-05000.safetensors")]);
        assert!(!result.is_complete);
        assert_eq!(result.missing_count, 4999);
        assert_eq!(result.missing_shards.len(), ValidationConfig::MAX_REPORTED_MISSING);
        assert_eq!(result.missing_shards[0], 2);
    }

    #[test]
    fn test_empty_set_is_incomplete() {
        assert!(!validate_shard_completeness(&[]).is_complete);
    }
}
