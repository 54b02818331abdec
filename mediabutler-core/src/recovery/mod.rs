//! Failure classification and move rollback.

mod classifier;
mod rollback;

pub use classifier::{
    ErrorClassification, ErrorClassifier, ErrorContext, RecoveryAction,
};
pub use rollback::{RollbackReport, RollbackService};
