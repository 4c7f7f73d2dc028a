//! Per-format structural validators.
//!
//! Each format has one implementation of [`FormatValidator`]; the
//! [`ValidatorTable`] maps a detected format to its validator. Adding a
//! format means adding one implementation and one table entry.

mod coreml;
mod ggml;
mod gguf;
mod onnx;
mod safetensors;
mod shards;
mod tflite;

pub use coreml::{CoreMlValidator, ManagedRuntime, RuntimeLoadError};
pub use ggml::GgmlValidator;
pub use gguf::GgufValidator;
pub use onnx::OnnxValidator;
pub use safetensors::SafetensorsValidator;
pub use shards::{validate_shard_completeness, ShardValidation};
pub use tflite::TfLiteValidator;

use crate::models::ModelFormat;
use crate::validation::types::Findings;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Structural check for one binary format. Never executes the model.
pub trait FormatValidator: Send + Sync {
    fn format(&self) -> ModelFormat;

    /// Errors and warnings for the artifact at `path`. No errors means valid.
    fn validate(&self, path: &Path) -> Findings;
}

/// Lookup table from detected format to validator.
#[derive(Clone)]
pub struct ValidatorTable {
    validators: HashMap<ModelFormat, Arc<dyn FormatValidator>>,
}

impl ValidatorTable {
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// The built-in validators. `runtime` backs the managed-runtime format.
    pub fn with_defaults(runtime: Option<Arc<dyn ManagedRuntime>>) -> Self {
        let mut table = Self::empty();
        table.register(Arc::new(GgufValidator));
        table.register(Arc::new(GgmlValidator));
        table.register(Arc::new(TfLiteValidator));
        table.register(Arc::new(OnnxValidator));
        table.register(Arc::new(SafetensorsValidator));
        table.register(Arc::new(CoreMlValidator::new(runtime)));
        table
    }

    /// Add or replace the validator for its format.
    pub fn register(&mut self, validator: Arc<dyn FormatValidator>) {
        self.validators.insert(validator.format(), validator);
    }

    pub fn get(&self, format: ModelFormat) -> Option<Arc<dyn FormatValidator>> {
        self.validators.get(&format).cloned()
    }
}

impl std::fmt::Debug for ValidatorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorTable")
            .field("formats", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read up to `len` leading bytes of a file.
pub(crate) fn read_prefix(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut buffer = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_format() {
        let table = ValidatorTable::with_defaults(None);
        for format in ModelFormat::ALL {
            let validator = table.get(format).expect("validator registered");
            assert_eq!(validator.format(), format);
        }
    }

    #[test]
    fn test_register_replaces_entry() {
        struct AlwaysClean;
        impl FormatValidator for AlwaysClean {
            fn format(&self) -> ModelFormat {
                ModelFormat::Onnx
            }
            fn validate(&self, _path: &Path) -> Findings {
                Findings::default()
            }
        }

        let mut table = ValidatorTable::with_defaults(None);
        table.register(Arc::new(AlwaysClean));
        let findings = table
            .get(ModelFormat::Onnx)
            .unwrap()
            .validate(Path::new("/does/not/exist.onnx"));
        assert!(findings.is_clean());
    }
}
