use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete phase of a model's journey from discovery to execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Discovered,
    Downloading,
    Downloaded,
    Extracting,
    Extracted,
    Validating,
    Validated,
    Initializing,
    Initialized,
    Loading,
    Loaded,
    Ready,
    Executing,
    Error,
    Cleanup,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 16] = [
        LifecycleState::Uninitialized,
        LifecycleState::Discovered,
        LifecycleState::Downloading,
        LifecycleState::Downloaded,
        LifecycleState::Extracting,
        LifecycleState::Extracted,
        LifecycleState::Validating,
        LifecycleState::Validated,
        LifecycleState::Initializing,
        LifecycleState::Initialized,
        LifecycleState::Loading,
        LifecycleState::Loaded,
        LifecycleState::Ready,
        LifecycleState::Executing,
        LifecycleState::Error,
        LifecycleState::Cleanup,
    ];

    /// Whether `(self, to)` is an edge of the transition table.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, to) {
            // Forward flow
            (Uninitialized, Discovered)
            | (Discovered, Downloading)
            | (Downloading, Downloaded)
            | (Downloaded, Extracting)
            | (Extracting, Extracted)
            | (Extracted, Validating)
            | (Validating, Validated)
            | (Validated, Initializing)
            | (Initializing, Initialized)
            | (Initialized, Loading)
            | (Loading, Loaded)
            | (Loaded, Ready) => true,

            // Already local / nothing to extract
            (Discovered, Validated) | (Downloaded, Validating) => true,

            (Ready, Executing) | (Executing, Ready) => true,

            // Recovery
            (Error, Discovered) => true,
            (Cleanup, Uninitialized) => true,
            (from, Error) => from != Error,
            (from, Cleanup) => !matches!(from, Cleanup | Uninitialized),

            _ => false,
        }
    }

    /// States a model rests in without further work being scheduled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Ready | LifecycleState::Error | LifecycleState::Uninitialized
        )
    }

    /// Only an executing model may be invoked.
    pub fn permits_invocation(self) -> bool {
        self == LifecycleState::Executing
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Discovered => "discovered",
            LifecycleState::Downloading => "downloading",
            LifecycleState::Downloaded => "downloaded",
            LifecycleState::Extracting => "extracting",
            LifecycleState::Extracted => "extracted",
            LifecycleState::Validating => "validating",
            LifecycleState::Validated => "validated",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Loading => "loading",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Ready => "ready",
            LifecycleState::Executing => "executing",
            LifecycleState::Error => "error",
            LifecycleState::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
