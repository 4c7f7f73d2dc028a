//! Streaming checksum computation and verification.
//!
//! Files are read in fixed chunks so multi-gigabyte models never sit in
//! memory. SHA-256, SHA-512 and BLAKE3 are the supported digests; MD5 is
//! accepted only so older catalogs keep validating.

use crate::cancel::CancellationToken;
use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tokio::sync::mpsc;

/// Chunk size for reading files (8MB, optimal for SSDs).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Digest algorithms understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
    Blake3,
    /// Legacy; never recommended for new content.
    Md5,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha512,
        ChecksumAlgorithm::Blake3,
        ChecksumAlgorithm::Md5,
    ];

    pub fn is_legacy(&self) -> bool {
        matches!(self, ChecksumAlgorithm::Md5)
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 | ChecksumAlgorithm::Blake3 => 64,
            ChecksumAlgorithm::Sha512 => 128,
            ChecksumAlgorithm::Md5 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Blake3 => "blake3",
            ChecksumAlgorithm::Md5 => "md5",
        };
        f.write_str(name)
    }
}

/// Progress update during hashing.
#[derive(Debug, Clone)]
pub struct HashProgress {
    pub bytes_processed: u64,
    pub total_bytes: u64,
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
    Md5(md5::Context),
}

impl DigestState {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
            ChecksumAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
            ChecksumAlgorithm::Md5 => DigestState::Md5(md5::Context::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestState::Sha256(h) => h.update(bytes),
            DigestState::Sha512(h) => h.update(bytes),
            DigestState::Blake3(h) => {
                h.update(bytes);
            }
            DigestState::Md5(h) => h.consume(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Sha512(h) => hex::encode(h.finalize()),
            DigestState::Blake3(h) => h.finalize().to_hex().to_string(),
            DigestState::Md5(h) => format!("{:x}", h.compute()),
        }
    }
}

/// Computes and compares content digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumValidator;

impl ChecksumValidator {
    pub fn new() -> Self {
        Self
    }

    /// Stream `path` and return its lowercase hex digest.
    pub fn calculate(&self, path: impl AsRef<Path>, algorithm: ChecksumAlgorithm) -> Result<String> {
        hash_file(path.as_ref(), algorithm, None, None)
    }

    /// Compare the digest of `path` with `expected`, ignoring case.
    pub fn validate(
        &self,
        path: impl AsRef<Path>,
        expected: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<bool> {
        let actual = self.calculate(path, algorithm)?;
        Ok(digests_match(&actual, expected))
    }

    /// Hash on a blocking thread with optional progress and cancellation.
    ///
    /// Cancellation is checked between chunks and surfaces as
    /// `DownloadError::Cancelled`.
    pub async fn calculate_async(
        &self,
        path: impl AsRef<Path>,
        algorithm: ChecksumAlgorithm,
        progress_tx: Option<mpsc::Sender<HashProgress>>,
        cancel: Option<CancellationToken>,
    ) -> Result<String> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            hash_file(&path, algorithm, progress_tx.as_ref(), cancel.as_ref())
        })
        .await
        .map_err(|e| StrataError::Other(format!("Hash computation task failed: {}", e)))?
    }
}

/// Case-insensitive digest comparison, ignoring surrounding whitespace.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

fn hash_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    progress_tx: Option<&mpsc::Sender<HashProgress>>,
    cancel: Option<&CancellationToken>,
) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| StrataError::io_with_path(e, path))?;
    let total_bytes = file
        .metadata()
        .map_err(|e| StrataError::io_with_path(e, path))?
        .len();

    let mut state = DigestState::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE.min(total_bytes.max(1) as usize)];
    let mut bytes_processed: u64 = 0;

    loop {
        if let Some(token) = cancel {
            token.check()?;
        }

        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| StrataError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }

        state.update(&buffer[..bytes_read]);
        bytes_processed += bytes_read as u64;

        if let Some(tx) = progress_tx {
            // Receivers may lag or go away; progress is best-effort.
            let _ = tx.try_send(HashProgress {
                bytes_processed,
                total_bytes,
            });
        }
    }

    Ok(state.finalize_hex())
}
