//! Model validation: format detection, checksums, per-format structural
//! checks, dependency resolution and the coordinator that aggregates them.

mod checksum;
mod coordinator;
mod dependencies;
pub(crate) mod detector;
pub mod formats;
mod metadata;
mod types;

pub use checksum::{digests_match, ChecksumAlgorithm, ChecksumValidator, HashProgress};
pub use coordinator::ValidationCoordinator;
pub use dependencies::DependencyChecker;
pub use detector::{primary_artifact, sniff, FormatDetector};
pub use metadata::{HeaderMetadataExtractor, MetadataExtractor};
pub use types::{
    DependencyKind, Findings, MissingDependency, ModelMetadata, ValidationError, ValidationVerdict,
    ValidationWarning, WarningSeverity,
};
