//! Convenience re-exports for consumers that want the whole model surface.

pub use crate::audit::AuditFields;
pub use crate::error::{ModelError, Result as ModelResult};
pub use crate::ids::{BatchJobId, FileHash, RollbackId};
pub use crate::log::{LogLevel, ProcessingLog};
pub use crate::preference::{PreferenceValue, UserPreference};
pub use crate::rollback::{OperationType, RollbackPoint};
pub use crate::tracked_file::{FileStatus, TrackedFile};
