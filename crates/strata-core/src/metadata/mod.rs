//! JSON persistence for install records and settings.
//!
//! All writes go through [`atomic_write_json`] so a crash never leaves a
//! truncated record next to an installed model.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};
