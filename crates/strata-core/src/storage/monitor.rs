//! Periodic storage monitoring.
//!
//! Each tick analyzes usage, publishes the snapshot on a watch channel,
//! runs the alert checks and, when a free-space target is configured,
//! the staged automatic cleanup.

use super::alerts::{AlertDispatch, AlertManager};
use super::analyzer::StorageAnalyzer;
use super::cleaner::{CleanupReport, StorageCleaner};
use super::info::StorageInfo;
use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::error::{Result, StrataError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one monitoring pass.
#[derive(Debug, Clone)]
pub struct MonitorTick {
    pub info: Arc<StorageInfo>,
    pub alerts: Vec<AlertDispatch>,
    pub cleanup: Option<CleanupReport>,
}

pub struct StorageMonitor {
    analyzer: Arc<StorageAnalyzer>,
    alerts: Arc<AlertManager>,
    cleaner: Arc<StorageCleaner>,
    settings: Settings,
    latest: watch::Sender<Option<Arc<StorageInfo>>>,
}

impl StorageMonitor {
    pub fn new(
        analyzer: Arc<StorageAnalyzer>,
        alerts: Arc<AlertManager>,
        cleaner: Arc<StorageCleaner>,
        settings: Settings,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            analyzer,
            alerts,
            cleaner,
            settings,
            latest,
        }
    }

    /// Receiver holding the most recent snapshot (`None` before the first tick).
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<StorageInfo>>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<StorageInfo>> {
        self.latest.borrow().clone()
    }

    /// Run a single analyze / publish / alert / cleanup pass.
    pub async fn run_once(&self) -> Result<MonitorTick> {
        let analyzer = Arc::clone(&self.analyzer);
        let info = Arc::new(blocking(move || analyzer.analyze()).await?);
        self.latest.send_replace(Some(Arc::clone(&info)));

        let alerts = self.alerts.check_storage_alerts(&info);
        let delivered = alerts.iter().filter(|d| !d.suppressed).count();
        debug!(alerts = alerts.len(), delivered, "Storage alerts checked");

        let cleanup = match self.settings.auto_cleanup_target_bytes {
            Some(target) if info.device.free_space < target => {
                let cleaner = Arc::clone(&self.cleaner);
                let preserve_recent = self.settings.preserve_recent;
                Some(blocking(move || cleaner.perform_automatic_cleanup(target, preserve_recent)).await?)
            }
            _ => None,
        };

        Ok(MonitorTick {
            info,
            alerts,
            cleanup,
        })
    }

    /// Start the monitoring loop on the current runtime. The loop ends when
    /// `token` is cancelled; a failed tick is logged and the loop continues.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.monitor_interval();
            info!(interval_secs = period.as_secs(), "Starting storage monitoring");

            loop {
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Storage monitoring pass failed");
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }

            info!("Storage monitoring stopped");
        })
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StrataError::Other(format!("Storage task failed: {}", e)))?
}

impl std::fmt::Debug for StorageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMonitor")
            .field("interval", &self.settings.monitor_interval())
            .finish_non_exhaustive()
    }
}
