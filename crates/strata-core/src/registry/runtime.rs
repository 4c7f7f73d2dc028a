use crate::validation::formats::ManagedRuntime;
use std::sync::Arc;

/// Holds the host's managed model runtime, when the platform has one.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtime: Option<Arc<dyn ManagedRuntime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runtime: Arc<dyn ManagedRuntime>) {
        self.runtime = Some(runtime);
    }

    pub fn get(&self) -> Option<Arc<dyn ManagedRuntime>> {
        self.runtime.clone()
    }

    pub fn is_available(&self) -> bool {
        self.runtime.is_some()
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtime", &self.runtime.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}
