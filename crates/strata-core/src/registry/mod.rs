//! Capability registries populated once at process start.
//!
//! Optional collaborators (execution backends, tokenizers, the managed model
//! runtime) register themselves under a key. A missing registration is the
//! "not available" signal; nothing is resolved by name at run time.

mod backend;
mod runtime;
mod tokenizer;

pub use backend::{BackendConstructor, BackendRegistry, ExecutionBackend};
pub use runtime::RuntimeRegistry;
pub use tokenizer::TokenizerRegistry;

#[cfg(test)]
pub(crate) use backend::tests::NullBackend;
