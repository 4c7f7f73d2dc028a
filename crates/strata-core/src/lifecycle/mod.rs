//! Model lifecycle: the state table, the per-model state machine and the
//! session that drives a model through it.

mod machine;
mod session;
mod state;

pub use machine::{LifecycleStateMachine, ObserverHandle, StateObserver};
pub use session::ModelSession;
pub use state::LifecycleState;
