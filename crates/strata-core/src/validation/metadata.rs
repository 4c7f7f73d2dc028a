//! Best-effort metadata extraction from model headers and configs.
//!
//! Nothing here can fail a verdict; the coordinator turns extraction errors
//! into informational warnings.

use crate::error::{Result, StrataError};
use crate::models::ModelFormat;
use crate::storage::artifact_size;
use crate::validation::detector::magic;
use crate::validation::types::ModelMetadata;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

/// GGUF metadata value type tags.
mod gguf_type {
    pub const UINT8: u32 = 0;
    pub const INT8: u32 = 1;
    pub const UINT16: u32 = 2;
    pub const INT16: u32 = 3;
    pub const UINT32: u32 = 4;
    pub const INT32: u32 = 5;
    pub const FLOAT32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const UINT64: u32 = 10;
    pub const INT64: u32 = 11;
    pub const FLOAT64: u32 = 12;
}

const MAX_GGUF_STRING: usize = 1024 * 1024;
const MAX_GGUF_KEYS: u64 = 1000;
const MAX_ARRAY_DEPTH: usize = 10;

/// Produces architecture and requirement hints for a model artifact.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, format: Option<ModelFormat>) -> Result<ModelMetadata>;
}

/// Reads GGUF key/value headers, safetensors headers and `config.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderMetadataExtractor;

impl MetadataExtractor for HeaderMetadataExtractor {
    fn extract(&self, path: &Path, format: Option<ModelFormat>) -> Result<ModelMetadata> {
        let mut metadata = match format {
            Some(ModelFormat::Gguf) => read_gguf(path)?,
            Some(ModelFormat::Safetensors) => read_safetensors(path)?,
            _ => ModelMetadata::default(),
        };
        metadata.format = format;
        if metadata.min_memory_bytes.is_none() {
            metadata.min_memory_bytes = Some(artifact_size(path));
        }
        Ok(metadata)
    }
}

enum GgufValue {
    Text(String),
    Unsigned(u64),
    Other,
}

fn read_gguf(path: &Path) -> Result<ModelMetadata> {
    let file = fs::File::open(path).map_err(|e| StrataError::io_with_path(e, path))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 24];
    reader
        .read_exact(&mut header)
        .map_err(|e| StrataError::io_with_path(e, path))?;
    if &header[..4] != magic::GGUF {
        return Err(StrataError::Other("not a GGUF header".into()));
    }
    let tensor_count = u64::from_le_bytes(le_array(&header[8..16]));
    let kv_count = u64::from_le_bytes(le_array(&header[16..24]));

    let mut metadata = ModelMetadata {
        tensor_count: Some(tensor_count),
        ..ModelMetadata::default()
    };
    let mut context_lengths = Vec::new();

    for _ in 0..kv_count.min(MAX_GGUF_KEYS) {
        let Ok(key) = read_gguf_string(&mut reader) else {
            break;
        };
        let Ok(value_type) = read_u32(&mut reader) else {
            break;
        };
        let Ok(value) = read_gguf_value(&mut reader, value_type, 0) else {
            break;
        };

        match (key.as_str(), value) {
            ("general.architecture", GgufValue::Text(v)) => metadata.architecture = Some(v),
            ("general.name", GgufValue::Text(v)) => metadata.name = Some(v),
            (k, GgufValue::Unsigned(v)) if k.ends_with(".context_length") => {
                context_lengths.push((k.to_string(), v));
            }
            (k, GgufValue::Text(v)) if k.starts_with("general.") => {
                metadata.extra.insert(k.to_string(), v);
            }
            _ => {}
        }
    }

    // Prefer `<architecture>.context_length` when several are present.
    metadata.context_length = metadata
        .architecture
        .as_ref()
        .and_then(|arch| {
            let wanted = format!("{}.context_length", arch);
            context_lengths.iter().find(|(k, _)| *k == wanted).map(|(_, v)| *v)
        })
        .or_else(|| context_lengths.first().map(|(_, v)| *v));

    Ok(metadata)
}

fn read_gguf_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u64(reader)? as usize;
    if len > MAX_GGUF_STRING {
        return Err(StrataError::Other("GGUF string too long".into()));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| StrataError::Other("Invalid UTF-8 in GGUF string".into()))
}

fn read_gguf_value<R: Read>(reader: &mut R, value_type: u32, depth: usize) -> Result<GgufValue> {
    if depth > MAX_ARRAY_DEPTH {
        return Err(StrataError::Other("GGUF array nesting too deep".into()));
    }

    let value = match value_type {
        gguf_type::UINT8 | gguf_type::INT8 | gguf_type::BOOL => {
            let mut b = [0u8; 1];
            reader.read_exact(&mut b)?;
            GgufValue::Unsigned(u64::from(b[0]))
        }
        gguf_type::UINT16 | gguf_type::INT16 => {
            let mut b = [0u8; 2];
            reader.read_exact(&mut b)?;
            GgufValue::Unsigned(u64::from(u16::from_le_bytes(b)))
        }
        gguf_type::UINT32 | gguf_type::INT32 => GgufValue::Unsigned(u64::from(read_u32(reader)?)),
        gguf_type::UINT64 | gguf_type::INT64 => GgufValue::Unsigned(read_u64(reader)?),
        gguf_type::FLOAT32 => {
            read_u32(reader)?;
            GgufValue::Other
        }
        gguf_type::FLOAT64 => {
            read_u64(reader)?;
            GgufValue::Other
        }
        gguf_type::STRING => GgufValue::Text(read_gguf_string(reader)?),
        gguf_type::ARRAY => {
            let element_type = read_u32(reader)?;
            let len = read_u64(reader)?;
            for _ in 0..len {
                read_gguf_value(reader, element_type, depth + 1)?;
            }
            GgufValue::Other
        }
        _ => return Err(StrataError::Other("Unknown GGUF type".into())),
    };
    Ok(value)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    reader.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn le_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

fn read_safetensors(path: &Path) -> Result<ModelMetadata> {
    let mut metadata = ModelMetadata::default();

    let config_path = if path.is_dir() {
        path.join("config.json")
    } else {
        metadata.tensor_count = safetensors_tensor_count(path).ok();
        path.parent().map(|p| p.join("config.json")).unwrap_or_default()
    };

    if config_path.is_file() {
        let contents =
            fs::read_to_string(&config_path).map_err(|e| StrataError::io_with_path(e, &config_path))?;
        let config: serde_json::Value = serde_json::from_str(&contents)?;

        metadata.architecture = config
            .get("architectures")
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|a| a.as_str())
            .map(String::from);
        if let Some(model_type) = config.get("model_type").and_then(|v| v.as_str()) {
            metadata.extra.insert("model_type".into(), model_type.to_string());
            metadata.architecture.get_or_insert_with(|| model_type.to_string());
        }
        metadata.name = config
            .get("_name_or_path")
            .and_then(|v| v.as_str())
            .map(String::from);
        metadata.context_length = config
            .get("max_position_embeddings")
            .and_then(|v| v.as_u64());
    }

    Ok(metadata)
}

fn safetensors_tensor_count(path: &Path) -> Result<u64> {
    let mut file = fs::File::open(path).map_err(|e| StrataError::io_with_path(e, path))?;
    let header_len = read_u64(&mut file)?;
    if header_len > crate::config::ValidationConfig::SAFETENSORS_MAX_HEADER {
        return Err(StrataError::Other("safetensors header too large".into()));
    }
    let mut json = vec![0u8; header_len as usize];
    file.read_exact(&mut json)?;
    let header: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&json)?;
    Ok(header.keys().filter(|k| k.as_str() != "__metadata__").count() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gguf_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u64).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    fn sample_gguf() -> Vec<u8> {
        let mut bytes = b"GGUF".to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&4u64.to_le_bytes());

        gguf_string(&mut bytes, "general.architecture");
        bytes.extend_from_slice(&gguf_type::STRING.to_le_bytes());
        gguf_string(&mut bytes, "llama");

        gguf_string(&mut bytes, "tokenizer.ggml.scores");
        bytes.extend_from_slice(&gguf_type::ARRAY.to_le_bytes());
        bytes.extend_from_slice(&gguf_type::FLOAT32.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);

        gguf_string(&mut bytes, "llama.context_length");
        bytes.extend_from_slice(&gguf_type::UINT32.to_le_bytes());
        bytes.extend_from_slice(&4096u32.to_le_bytes());

        gguf_string(&mut bytes, "general.name");
        bytes.extend_from_slice(&gguf_type::STRING.to_le_bytes());
        gguf_string(&mut bytes, "Tiny Llama");
        bytes
    }

    #[test]
    fn test_gguf_key_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tiny.gguf");
        fs::write(&path, sample_gguf()).unwrap();

        let metadata = HeaderMetadataExtractor
            .extract(&path, Some(ModelFormat::Gguf))
            .unwrap();
        assert_eq!(metadata.architecture.as_deref(), Some("llama"));
        assert_eq!(metadata.name.as_deref(), Some("Tiny Llama"));
        assert_eq!(metadata.context_length, Some(4096));
        assert_eq!(metadata.tensor_count, Some(5));
        assert_eq!(metadata.format, Some(ModelFormat::Gguf));
    }

    #[test]
    fn test_truncated_gguf_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("short.gguf");
        fs::write(&path, b"GGUF\x03\x00").unwrap();
        assert!(HeaderMetadataExtractor
            .extract(&path, Some(ModelFormat::Gguf))
            .is_err());
    }

    #[test]
    fn test_config_json_architecture() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.json"),
            r#"{"architectures":["BertModel"],"model_type":"bert","max_position_embeddings":512}"#,
        )
        .unwrap();
        let json = br#"{"a":{},"b":{},"__metadata__":{}}"#;
        let mut weights = (json.len() as u64).to_le_bytes().to_vec();
        weights.extend_from_slice(json);
        let file = tmp.path().join("model.safetensors");
        fs::write(&file, weights).unwrap();

        let metadata = HeaderMetadataExtractor
            .extract(&file, Some(ModelFormat::Safetensors))
            .unwrap();
        assert_eq!(metadata.architecture.as_deref(), Some("BertModel"));
        assert_eq!(metadata.extra.get("model_type").map(String::as_str), Some("bert"));
        assert_eq!(metadata.context_length, Some(512));
        assert_eq!(metadata.tensor_count, Some(2));
    }

    #[test]
    fn test_other_formats_report_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("m.onnx");
        fs::write(&path, [0u8; 42]).unwrap();
        let metadata = HeaderMetadataExtractor
            .extract(&path, Some(ModelFormat::Onnx))
            .unwrap();
        assert_eq!(metadata.min_memory_bytes, Some(42));
        assert!(metadata.architecture.is_none());
    }
}
