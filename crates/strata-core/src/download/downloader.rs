//! Streams a model artifact into the temp area and finalizes it under
//! `Downloads/`.
//!
//! - An existing `.tmp`/`.partial` for the model is resumed from its length
//! - Progress is sent with `try_send`; a slow receiver only misses updates
//! - Cancellation or a transport failure leaves a `.partial` behind

use super::fetcher::Fetcher;
use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::models::ModelDescriptor;
use crate::storage::DownloadStorage;
use futures::StreamExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Progress information for a download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub model_id: String,
    /// Bytes on disk so far, including any resumed prefix.
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: f64,
    /// Percentage complete (0-100).
    pub percent: Option<f64>,
    pub eta_seconds: Option<f64>,
}

impl DownloadProgress {
    fn new(model_id: &str, bytes_downloaded: u64, total_bytes: Option<u64>, speed: f64) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        });

        let eta_seconds = total_bytes.and_then(|total| {
            if speed > 0.0 && bytes_downloaded < total {
                Some((total - bytes_downloaded) as f64 / speed)
            } else {
                None
            }
        });

        Self {
            model_id: model_id.to_string(),
            bytes_downloaded,
            total_bytes,
            speed_bytes_per_sec: speed,
            percent,
            eta_seconds,
        }
    }
}

pub struct ModelDownloader {
    storage: Arc<DownloadStorage>,
    fetcher: Arc<dyn Fetcher>,
    progress_interval: Duration,
}

impl ModelDownloader {
    pub fn new(storage: Arc<DownloadStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            storage,
            fetcher,
            progress_interval: DownloadConfig::PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Download `descriptor` and return the finalized path under `Downloads/`.
    pub async fn download(
        &self,
        descriptor: &ModelDescriptor,
        token: &CancellationToken,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<PathBuf> {
        if descriptor.is_local {
            return Err(DownloadError::LocalModel {
                model_id: descriptor.id.clone(),
            }
            .into());
        }
        let url = descriptor.download_url.as_deref().ok_or(DownloadError::NoUrl)?;
        let existing = self.storage.partial_download_exists(descriptor);
        let temp_path = self.storage.begin_download(descriptor)?;

        let offset = match existing {
            Some(partial) => match fs::rename(&partial.temp_path, &temp_path) {
                Ok(()) => {
                    self.storage.release(&partial.temp_path);
                    info!(model_id = %descriptor.id, bytes = partial.bytes_written, "Resuming download");
                    partial.bytes_written
                }
                Err(e) => {
                    warn!(path = %partial.temp_path.display(), error = %e, "Could not adopt partial download");
                    0
                }
            },
            None => 0,
        };

        let result = self
            .transfer(descriptor, url, &temp_path, offset, token, progress_tx)
            .await;

        match result {
            Ok(bytes) => {
                let path = self.storage.finalize_download(&temp_path, descriptor)?;
                info!(model_id = %descriptor.id, bytes, path = %path.display(), "Download complete");
                Ok(path)
            }
            Err(e) => {
                self.abandon(&temp_path);
                Err(e)
            }
        }
    }

    async fn transfer(
        &self,
        descriptor: &ModelDescriptor,
        url: &str,
        temp_path: &Path,
        offset: u64,
        token: &CancellationToken,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        token.check()?;
        let response = self.fetcher.fetch(url, offset).await?;

        let mut file = open_temp(temp_path, response.resumed)?;
        let mut bytes_downloaded = if response.resumed { offset } else { 0 };
        let total_bytes = response.total_bytes;
        let mut body = response.body;

        let mut speed = SpeedTracker::new();
        let mut last_progress = Instant::now();
        let report = |bytes: u64, speed: f64| {
            if let Some(tx) = &progress_tx {
                let _ = tx.try_send(DownloadProgress::new(&descriptor.id, bytes, total_bytes, speed));
            }
        };
        report(bytes_downloaded, 0.0);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    flush(&mut file, temp_path)?;
                    return Err(DownloadError::Cancelled.into());
                }
                chunk = body.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk)
                .map_err(|e| DownloadError::file_system(e, temp_path))?;
            bytes_downloaded += chunk.len() as u64;
            speed.record(chunk.len() as u64);
            self.storage.touch(temp_path);

            if last_progress.elapsed() >= self.progress_interval {
                report(bytes_downloaded, speed.speed());
                last_progress = Instant::now();
            }
        }

        flush(&mut file, temp_path)?;
        file.sync_all()
            .map_err(|e| DownloadError::file_system(e, temp_path))?;
        report(bytes_downloaded, speed.speed());
        Ok(bytes_downloaded)
    }

    /// Keep whatever reached disk as a `.partial` for the next attempt.
    fn abandon(&self, temp_path: &Path) {
        if !temp_path.exists() {
            self.storage.release(temp_path);
            return;
        }
        match self.storage.suspend(temp_path) {
            Ok(partial) => debug!(path = %partial.display(), "Kept partial download"),
            Err(e) => {
                warn!(path = %temp_path.display(), error = %e, "Could not suspend download");
                self.storage.release(temp_path);
            }
        }
    }
}

impl std::fmt::Debug for ModelDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDownloader")
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

fn open_temp(path: &Path, append: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    Ok(options
        .open(path)
        .map_err(|e| DownloadError::file_system(e, path))?)
}

fn flush(file: &mut File, path: &Path) -> Result<()> {
    file.flush()
        .map_err(|e| DownloadError::file_system(e, path))?;
    Ok(())
}

/// Average throughput since the transfer started.
struct SpeedTracker {
    start_time: Instant,
    total_bytes: u64,
}

impl SpeedTracker {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
        }
    }

    fn record(&mut self, bytes: u64) {
        self.total_bytes += bytes;
    }

    fn speed(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_bytes as f64 / elapsed
        } else {
            0.0
        }
    }
}
