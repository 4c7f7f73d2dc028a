//! Catalog-facing data types.

mod descriptor;
mod format;

pub use descriptor::{check_model_id, ExpectedChecksum, HardwareRequirements, Modality, ModelDescriptor};
pub use format::ModelFormat;

pub(crate) use descriptor::sanitize_id;
