//! Per-model lifecycle state machine.
//!
//! One instance owns the state of one model. Transitions are serialized
//! behind a single mutex and queued for observers in the order they were
//! accepted. Observers run after the lock is released so they may drive
//! further transitions from inside their callback; only one thread delivers
//! at a time, so every observer sees transitions in order even when they
//! race.

use super::LifecycleState;
use crate::error::LifecycleError;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Callback invoked with `(old, new)` after every accepted transition.
pub type StateObserver = Arc<dyn Fn(LifecycleState, LifecycleState) + Send + Sync>;

/// Stable handle returned by [`LifecycleStateMachine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverHandle(u64);

#[derive(Debug)]
struct MachineState {
    current: LifecycleState,
    /// Installed path that produced a passing verdict, if any.
    validated_path: Option<PathBuf>,
    /// Accepted transitions not yet delivered to observers.
    pending: VecDeque<(LifecycleState, LifecycleState)>,
    /// Set while some thread is draining `pending`.
    dispatching: bool,
}

/// Authoritative lifecycle state for a single model instance.
pub struct LifecycleStateMachine {
    model_id: String,
    state: Mutex<MachineState>,
    observers: Mutex<BTreeMap<ObserverHandle, StateObserver>>,
    next_handle: AtomicU64,
    watch_tx: watch::Sender<LifecycleState>,
}

impl LifecycleStateMachine {
    /// Create a machine in `Uninitialized`.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self::with_state(model_id, LifecycleState::Uninitialized)
    }

    /// Create a machine starting in an arbitrary state.
    pub fn with_state(model_id: impl Into<String>, initial: LifecycleState) -> Self {
        let (watch_tx, _) = watch::channel(initial);
        Self {
            model_id: model_id.into(),
            state: Mutex::new(MachineState {
                current: initial,
                validated_path: None,
                pending: VecDeque::new(),
                dispatching: false,
            }),
            observers: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            watch_tx,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn current_state(&self) -> LifecycleState {
        self.lock_state().current
    }

    /// Move to `new_state` if the edge is in the transition table.
    ///
    /// Entering `Ready` additionally requires a passing verdict recorded via
    /// [`record_verdict`](Self::record_verdict).
    pub fn transition_to(&self, new_state: LifecycleState) -> Result<LifecycleState, LifecycleError> {
        let old_state = {
            let mut state = self.lock_state();
            let from = state.current;

            if !from.can_transition_to(new_state) {
                debug!(model_id = %self.model_id, %from, to = %new_state, "Rejected lifecycle transition");
                return Err(LifecycleError::InvalidTransition { from, to: new_state });
            }
            if new_state == LifecycleState::Ready && state.validated_path.is_none() {
                return Err(LifecycleError::NotValidated {
                    model_id: self.model_id.clone(),
                });
            }

            if matches!(
                new_state,
                LifecycleState::Cleanup | LifecycleState::Uninitialized | LifecycleState::Discovered
            ) {
                state.validated_path = None;
            }
            state.current = new_state;
            state.pending.push_back((from, new_state));
            self.watch_tx.send_replace(new_state);
            from
        };

        debug!(model_id = %self.model_id, from = %old_state, to = %new_state, "Lifecycle transition");
        self.dispatch();
        Ok(old_state)
    }

    /// Return to `Uninitialized` through `Cleanup`.
    pub fn reset(&self) -> Result<(), LifecycleError> {
        self.transition_to(LifecycleState::Cleanup)?;
        self.transition_to(LifecycleState::Uninitialized)?;
        Ok(())
    }

    /// Record the outcome of validating `path`. Only a passing verdict unlocks `Ready`.
    pub fn record_verdict(&self, path: &Path, is_valid: bool) {
        let mut state = self.lock_state();
        state.validated_path = is_valid.then(|| path.to_path_buf());
    }

    /// The installed path that passed validation, if any.
    pub fn validated_path(&self) -> Option<PathBuf> {
        self.lock_state().validated_path.clone()
    }

    /// Register an observer. The machine never holds anything but the callback.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(LifecycleState, LifecycleState) + Send + Sync + 'static,
    {
        let handle = ObserverHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().insert(handle, Arc::new(observer));
        handle
    }

    /// Remove an observer. Returns false if the handle was unknown.
    pub fn unsubscribe(&self, handle: ObserverHandle) -> bool {
        self.lock_observers().remove(&handle).is_some()
    }

    /// Receiver that always holds the latest state, for async waiters.
    pub fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.watch_tx.subscribe()
    }

    /// Deliver queued transitions unless another caller already is.
    ///
    /// A transition made from inside an observer is queued behind the one
    /// being delivered and reaches observers once that delivery finishes.
    fn dispatch(&self) {
        {
            let mut state = self.lock_state();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        let _guard = DispatchGuard(self);

        loop {
            let next = {
                let mut state = self.lock_state();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.dispatching = false;
                }
                next
            };
            let Some((old_state, new_state)) = next else {
                break;
            };
            self.notify(old_state, new_state);
        }
    }

    fn notify(&self, old_state: LifecycleState, new_state: LifecycleState) {
        // Snapshot so callbacks can (un)subscribe without deadlocking.
        let observers: Vec<StateObserver> = self.lock_observers().values().cloned().collect();
        for observer in observers {
            observer(old_state, new_state);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(model_id = %self.model_id, "Lifecycle lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_observers(&self) -> MutexGuard<'_, BTreeMap<ObserverHandle, StateObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the dispatch flag if an observer panics mid-delivery.
struct DispatchGuard<'a>(&'a LifecycleStateMachine);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock_state().dispatching = false;
        }
    }
}

impl std::fmt::Debug for LifecycleStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleStateMachine")
            .field("model_id", &self.model_id)
            .field("state", &self.current_state())
            .finish()
    }
}
