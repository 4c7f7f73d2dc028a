//! Execution backend adapters and their registry.

use crate::error::Result;
use crate::models::Modality;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// An inference engine that runs a validated model file.
///
/// The store only hands it a path; what happens inside is opaque.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Registry key, e.g. `"llama.cpp"`.
    fn name(&self) -> &str;

    fn supports_modality(&self, modality: Modality) -> bool;

    /// Load the model at `path`. Called once per `Loading` transition.
    async fn load(&self, path: &Path) -> Result<()>;

    /// Release whatever `load` acquired.
    async fn unload(&self) -> Result<()>;
}

/// Builds a backend instance on first use.
pub type BackendConstructor = Arc<dyn Fn() -> Arc<dyn ExecutionBackend> + Send + Sync>;

/// Backend key → constructor, with constructed instances cached.
#[derive(Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
    instances: RwLock<HashMap<String, Arc<dyn ExecutionBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `key`, replacing any earlier one.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn ExecutionBackend> + Send + Sync + 'static,
    {
        let key = key.into();
        debug!(backend = %key, "Registered execution backend");
        if let Ok(mut instances) = self.instances.write() {
            instances.remove(&key);
        }
        self.constructors.insert(key, Arc::new(constructor));
    }

    pub fn is_available(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// False when the backend is unregistered.
    pub fn supports(&self, key: &str, modality: Modality) -> bool {
        self.get(key)
            .is_some_and(|backend| backend.supports_modality(modality))
    }

    /// Get or construct the backend registered under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<dyn ExecutionBackend>> {
        if let Ok(instances) = self.instances.read() {
            if let Some(backend) = instances.get(key) {
                return Some(backend.clone());
            }
        }

        let backend = (self.constructors.get(key)?)();
        if let Ok(mut instances) = self.instances.write() {
            instances.insert(key.to_string(), backend.clone());
        }
        Some(backend)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
