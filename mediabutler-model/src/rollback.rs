use std::fmt;
use std::path::PathBuf;

use crate::audit::AuditFields;
use crate::error::{ModelError, Result};
use crate::ids::{FileHash, RollbackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Move,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Move => "MOVE",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "MOVE" => Ok(OperationType::Move),
            other => Err(ModelError::UnknownOperationType(other.to_string())),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record permitting a completed operation to be reverted.
///
/// Soft-deleted once executed or expired; `original_path` and `target_path`
/// are captured as they were at operation time, before any conflict rename.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RollbackPoint {
    pub id: RollbackId,
    pub file_hash: FileHash,
    pub operation_type: OperationType,
    pub original_path: PathBuf,
    pub target_path: PathBuf,
    pub info: Option<String>,
    pub audit: AuditFields,
}
