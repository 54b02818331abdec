//! Core data model definitions shared across MediaButler crates.
#![allow(missing_docs)]

pub mod audit;
pub mod error;
pub mod ids;
pub mod log;
pub mod preference;
pub mod prelude;
pub mod rollback;
pub mod tracked_file;

// Intentionally curated re-exports for downstream consumers.
pub use audit::AuditFields;
pub use error::{ModelError, Result as ModelResult};
pub use ids::{BatchJobId, FileHash, RollbackId};
pub use log::{LogLevel, ProcessingLog};
pub use preference::{PreferenceValue, UserPreference};
pub use rollback::{OperationType, RollbackPoint};
pub use tracked_file::{FileStatus, TrackedFile};
