use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary model formats the store knows how to detect and validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// GGUF quantized container.
    Gguf,
    /// Pre-GGUF GGML family (`ggml`, `ggmf`/`lmgg`, `ggjt`).
    Ggml,
    /// Mobile interpreter flatbuffer.
    TfLite,
    /// Protobuf-encoded graph.
    Onnx,
    /// Safetensors weights, single file or packaged directory.
    Safetensors,
    /// Managed-runtime package compiled and loaded by the host platform.
    CoreMl,
}

/// Static extension table. Generic extensions (`bin`) are deliberately absent.
const EXTENSIONS: &[(&str, ModelFormat)] = &[
    ("gguf", ModelFormat::Gguf),
    ("ggml", ModelFormat::Ggml),
    ("tflite", ModelFormat::TfLite),
    ("lite", ModelFormat::TfLite),
    ("onnx", ModelFormat::Onnx),
    ("ort", ModelFormat::Onnx),
    ("safetensors", ModelFormat::Safetensors),
    ("mlmodel", ModelFormat::CoreMl),
    ("mlmodelc", ModelFormat::CoreMl),
    ("mlpackage", ModelFormat::CoreMl),
];

impl ModelFormat {
    pub const ALL: [ModelFormat; 6] = [
        ModelFormat::Gguf,
        ModelFormat::Ggml,
        ModelFormat::TfLite,
        ModelFormat::Onnx,
        ModelFormat::Safetensors,
        ModelFormat::CoreMl,
    ];

    /// Look up a format by file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|(_, format)| *format)
    }

    /// All extensions that map to this format.
    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        EXTENSIONS
            .iter()
            .filter(move |(_, format)| format == self)
            .map(|(ext, _)| *ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Gguf => "gguf",
            ModelFormat::Ggml => "ggml",
            ModelFormat::TfLite => "tflite",
            ModelFormat::Onnx => "onnx",
            ModelFormat::Safetensors => "safetensors",
            ModelFormat::CoreMl => "coreml",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        assert_eq!(ModelFormat::from_extension("GGUF"), Some(ModelFormat::Gguf));
        assert_eq!(ModelFormat::from_extension("mlpackage"), Some(ModelFormat::CoreMl));
        assert_eq!(ModelFormat::from_extension("bin"), None);
    }

    #[test]
    fn test_every_format_has_an_extension() {
        for format in ModelFormat::ALL {
            assert!(format.extensions().next().is_some(), "{format} has no extension");
        }
    }
}
