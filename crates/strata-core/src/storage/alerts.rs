//! Storage threshold alerts with de-duplication.
//!
//! Every evaluated alert is recorded in a bounded history. An alert whose
//! `(type, message)` pair was already recorded inside the suppression window
//! is recorded again but not delivered. Delivery is fire-and-forget: each
//! callback runs detached so a slow subscriber never stalls the caller.

use super::info::StorageInfo;
use crate::config::{Settings, StorageConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DeviceStorage,
    ModelStorageShare,
    CacheSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for StorageAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)
    }
}

/// Outcome of one evaluated alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDispatch {
    pub alert: StorageAlert,
    /// Recorded in history but not delivered to callbacks.
    pub suppressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub device_warning_ratio: f64,
    pub device_critical_ratio: f64,
    pub model_share_ratio: f64,
    pub cache_ceiling_bytes: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            device_warning_ratio: StorageConfig::DEVICE_WARNING_RATIO,
            device_critical_ratio: StorageConfig::DEVICE_CRITICAL_RATIO,
            model_share_ratio: StorageConfig::MODEL_SHARE_RATIO,
            cache_ceiling_bytes: StorageConfig::CACHE_CEILING_BYTES,
        }
    }
}

impl From<&Settings> for AlertThresholds {
    fn from(settings: &Settings) -> Self {
        Self {
            device_warning_ratio: settings.device_warning_ratio,
            device_critical_ratio: settings.device_critical_ratio,
            model_share_ratio: settings.model_share_ratio,
            cache_ceiling_bytes: settings.cache_ceiling_bytes,
        }
    }
}

pub type AlertCallback = Arc<dyn Fn(StorageAlert) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlertHandle(u64);

pub struct AlertManager {
    thresholds: AlertThresholds,
    window: Duration,
    history: Mutex<VecDeque<StorageAlert>>,
    callbacks: Mutex<BTreeMap<AlertHandle, AlertCallback>>,
    next_handle: AtomicU64,
}

impl AlertManager {
    pub fn new(thresholds: AlertThresholds, window: Duration) -> Self {
        Self {
            thresholds,
            window,
            history: Mutex::new(VecDeque::with_capacity(StorageConfig::ALERT_HISTORY_LIMIT)),
            callbacks: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.into(), settings.alert_suppression_window())
    }

    /// Alerts for every threshold `info` breaches. Pure; records nothing.
    pub fn evaluate(&self, info: &StorageInfo) -> Vec<StorageAlert> {
        let now = Utc::now();
        let alert = |alert_type, severity, message: String| StorageAlert {
            alert_type,
            severity,
            message,
            timestamp: now,
        };
        let mut alerts = Vec::new();

        // One alert per breach; critical supersedes warning.
        let usage = info.device.usage_ratio();
        if usage >= self.thresholds.device_critical_ratio {
            alerts.push(alert(
                AlertType::DeviceStorage,
                AlertSeverity::Critical,
                format!("Device storage critically low: {:.0}% used", usage * 100.0),
            ));
        } else if usage >= self.thresholds.device_warning_ratio {
            alerts.push(alert(
                AlertType::DeviceStorage,
                AlertSeverity::Warning,
                format!("Device storage running low: {:.0}% used", usage * 100.0),
            ));
        }

        let share = info.model_share_ratio();
        if share >= self.thresholds.model_share_ratio {
            alerts.push(alert(
                AlertType::ModelStorageShare,
                AlertSeverity::Warning,
                format!("Models occupy {:.0}% of device storage", share * 100.0),
            ));
        }

        if info.cache_size >= self.thresholds.cache_ceiling_bytes {
            alerts.push(alert(
                AlertType::CacheSize,
                AlertSeverity::Info,
                format!("Cache has grown to {} MiB", info.cache_size / (1024 * 1024)),
            ));
        }

        alerts
    }

    /// Evaluate, record and deliver alerts for `info`.
    pub fn check_storage_alerts(&self, info: &StorageInfo) -> Vec<AlertDispatch> {
        self.evaluate(info)
            .into_iter()
            .map(|alert| {
                let suppressed = self.should_suppress_alert(&alert);
                self.record(alert.clone());
                if suppressed {
                    debug!(alert_type = ?alert.alert_type, "Alert suppressed");
                } else {
                    self.deliver(&alert);
                }
                AlertDispatch { alert, suppressed }
            })
            .collect()
    }

    /// Whether an identical alert was recorded within the suppression window.
    pub fn should_suppress_alert(&self, alert: &StorageAlert) -> bool {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        self.lock_history().iter().any(|previous| {
            previous.alert_type == alert.alert_type
                && previous.message == alert.message
                && alert.timestamp.signed_duration_since(previous.timestamp) < window
        })
    }

    /// Recorded alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<StorageAlert> {
        self.lock_history().iter().cloned().collect()
    }

    pub fn subscribe<F>(&self, callback: F) -> AlertHandle
    where
        F: Fn(StorageAlert) + Send + Sync + 'static,
    {
        let handle = AlertHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock_callbacks().insert(handle, Arc::new(callback));
        handle
    }

    pub fn unsubscribe(&self, handle: AlertHandle) -> bool {
        self.lock_callbacks().remove(&handle).is_some()
    }

    fn record(&self, alert: StorageAlert) {
        let mut history = self.lock_history();
        if history.len() >= StorageConfig::ALERT_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(alert);
    }

    fn deliver(&self, alert: &StorageAlert) {
        let callbacks: Vec<AlertCallback> = self.lock_callbacks().values().cloned().collect();
        for callback in callbacks {
            let alert = alert.clone();
            let run = move || callback(alert);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(run);
                }
                Err(_) => {
                    if let Err(e) = std::thread::Builder::new()
                        .name("strata-alert".into())
                        .spawn(run)
                    {
                        warn!(error = %e, "Could not spawn alert delivery thread");
                    }
                }
            }
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<StorageAlert>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, BTreeMap<AlertHandle, AlertCallback>> {
        self.callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field("thresholds", &self.thresholds)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::info::{AppStorage, DeviceStorage, ModelStorage};
    use std::sync::mpsc;

    fn info(used: u64, total: u64, models: u64, cache: u64) -> StorageInfo {
        StorageInfo {
            app: AppStorage {
                total_size: models + cache,
                ..AppStorage::default()
            },
            device: DeviceStorage {
                total_space: total,
                free_space: total - used,
                used_space: used,
            },
            models: ModelStorage {
                total_size: models,
                ..ModelStorage::default()
            },
            cache_size: cache,
            stored_models: Vec::new(),
            measured_at: Utc::now(),
        }
    }

    #[test]
    fn test_thresholds() {
        let manager = AlertManager::new(AlertThresholds::default(), Duration::from_secs(300));
        assert!(manager.evaluate(&info(50, 100, 1, 0)).is_empty());

        let alerts = manager.evaluate(&info(91, 100, 1, 0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        let alerts = manager.evaluate(&info(96, 100, 30, 3 << 30));
        let kinds: Vec<_> = alerts.iter().map(|a| (a.alert_type, a.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (AlertType::DeviceStorage, AlertSeverity::Critical),
                (AlertType::ModelStorageShare, AlertSeverity::Warning),
                (AlertType::CacheSize, AlertSeverity::Info),
            ]
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let manager = AlertManager::new(AlertThresholds::default(), Duration::ZERO);
        let snapshot = info(99, 100, 0, 0);
        for _ in 0..StorageConfig::ALERT_HISTORY_LIMIT + 10 {
            manager.check_storage_alerts(&snapshot);
        }
        assert_eq!(manager.recent_alerts().len(), StorageConfig::ALERT_HISTORY_LIMIT);
    }

    #[test]
    fn test_delivery_and_unsubscribe() {
        let manager = AlertManager::new(AlertThresholds::default(), Duration::ZERO);
        let (tx, rx) = mpsc::channel();
        let handle = manager.subscribe(move |alert| {
            let _ = tx.send(alert.alert_type);
        });

        manager.check_storage_alerts(&info(99, 100, 0, 0));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            AlertType::DeviceStorage
        );

        assert!(manager.unsubscribe(handle));
        manager.check_storage_alerts(&info(99, 100, 0, 0));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
