//! Companion artifact checks: tokenizers, backends, sidecar files and
//! paired encoder/decoder models.

use crate::models::ModelDescriptor;
use crate::registry::{BackendRegistry, TokenizerRegistry};
use crate::validation::types::{DependencyKind, MissingDependency};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Descriptor tag → files that must sit next to the model.
const COMPANION_FILES: &[(&str, &[&str])] = &[
    ("sherpa-tts", &["tokens.txt"]),
    ("vits", &["tokens.txt"]),
    ("matcha", &["tokens.txt"]),
    ("kitten", &["tokens.txt", "voices.bin"]),
    ("kokoro", &["tokens.txt", "voices.bin"]),
    ("hf-config", &["config.json"]),
    ("requires-config", &["config.json"]),
    ("tokenizer-json", &["tokenizer.json"]),
];

/// Halves of a paired model and their counterpart.
const PAIRS: &[(&str, &str)] = &[("encoder", "decoder"), ("decoder", "encoder")];

/// Verifies the companions a model needs exist or are resolvable.
#[derive(Debug, Clone)]
pub struct DependencyChecker {
    backends: Arc<BackendRegistry>,
    tokenizers: Arc<TokenizerRegistry>,
    models_dir: PathBuf,
}

impl DependencyChecker {
    pub fn new(
        backends: Arc<BackendRegistry>,
        tokenizers: Arc<TokenizerRegistry>,
        models_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backends,
            tokenizers,
            models_dir: models_dir.into(),
        }
    }

    /// Every unmet dependency of `descriptor` whose artifact is at `model_path`.
    pub fn check(&self, descriptor: &ModelDescriptor, model_path: &Path) -> Vec<MissingDependency> {
        let mut missing = Vec::new();
        missing.extend(self.check_tokenizer(descriptor));
        missing.extend(self.check_backends(descriptor));
        missing.extend(self.check_companion_files(descriptor, model_path));
        missing.extend(self.check_paired_model(descriptor, model_path));
        missing
    }

    fn check_tokenizer(&self, descriptor: &ModelDescriptor) -> Option<MissingDependency> {
        let family = descriptor.tokenizer_family.as_deref()?;
        if self.tokenizers.is_available(family) {
            return None;
        }
        Some(MissingDependency {
            kind: DependencyKind::Tokenizer,
            name: family.to_string(),
            reason: "no tokenizer registered for this family".to_string(),
        })
    }

    fn check_backends(&self, descriptor: &ModelDescriptor) -> Vec<MissingDependency> {
        descriptor
            .compatible_backends
            .iter()
            .filter_map(|key| {
                let reason = if !self.backends.is_available(key) {
                    "backend is not registered".to_string()
                } else if !self.backends.supports(key, descriptor.modality) {
                    format!("backend does not support {:?}", descriptor.modality)
                } else {
                    return None;
                };
                Some(MissingDependency {
                    kind: DependencyKind::Backend,
                    name: key.clone(),
                    reason,
                })
            })
            .collect()
    }

    fn check_companion_files(&self, descriptor: &ModelDescriptor, model_path: &Path) -> Vec<MissingDependency> {
        let dir = package_dir(model_path);
        let mut required: Vec<&str> = COMPANION_FILES
            .iter()
            .filter(|(tag, _)| descriptor.has_tag(tag))
            .flat_map(|(_, files)| files.iter().copied())
            .collect();
        required.sort_unstable();
        required.dedup();

        required
            .into_iter()
            .filter(|name| !dir.join(name).exists())
            .map(|name| MissingDependency {
                kind: DependencyKind::CompanionFile,
                name: name.to_string(),
                reason: format!("not found in {}", dir.display()),
            })
            .collect()
    }

    fn check_paired_model(&self, descriptor: &ModelDescriptor, model_path: &Path) -> Option<MissingDependency> {
        let (half, other) = PAIRS.iter().find(|(half, _)| descriptor.has_tag(half))?;
        let Some(companion_id) = swap_ascii(&descriptor.id, half, other) else {
            return Some(MissingDependency {
                kind: DependencyKind::PairedModel,
                name: format!("{} for {}", other, descriptor.id),
                reason: format!("model id does not contain \"{}\"", half),
            });
        };

        let installed = self
            .models_dir
            .join(crate::models::sanitize_id(&companion_id));
        if installed.is_dir() {
            return None;
        }

        let sibling = model_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| swap_ascii(name, half, other))
            .and_then(|name| model_path.parent().map(|p| p.join(name)));
        if sibling.is_some_and(|p| p.exists()) {
            return None;
        }

        Some(MissingDependency {
            kind: DependencyKind::PairedModel,
            name: companion_id,
            reason: "neither installed nor present beside the model".to_string(),
        })
    }
}

/// Directory holding a model's sidecar files.
fn package_dir(model_path: &Path) -> &Path {
    if model_path.is_dir() {
        model_path
    } else {
        model_path.parent().unwrap_or(model_path)
    }
}

/// Replace every case-insensitive occurrence of `from` with `to`.
fn swap_ascii(haystack: &str, from: &str, to: &str) -> Option<String> {
    let lower = haystack.to_ascii_lowercase();
    if !lower.contains(from) {
        return None;
    }
    let mut out = String::with_capacity(haystack.len());
    let mut rest = 0;
    for (start, _) in lower.match_indices(from) {
        out.push_str(&haystack[rest..start]);
        out.push_str(to);
        rest = start + from.len();
    }
    out.push_str(&haystack[rest..]);
    Some(out)
}
