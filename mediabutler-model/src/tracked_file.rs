use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::audit::AuditFields;
use crate::error::{ModelError, Result};
use crate::ids::FileHash;

/// Lifecycle state of a tracked file.
///
/// Transition legality lives in the file service; this enum only names the
/// states and knows which ones are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    New,
    Processing,
    Classified,
    ReadyToMove,
    Moving,
    Moved,
    Error,
    Retry,
    Ignored,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "NEW",
            FileStatus::Processing => "PROCESSING",
            FileStatus::Classified => "CLASSIFIED",
            FileStatus::ReadyToMove => "READY_TO_MOVE",
            FileStatus::Moving => "MOVING",
            FileStatus::Moved => "MOVED",
            FileStatus::Error => "ERROR",
            FileStatus::Retry => "RETRY",
            FileStatus::Ignored => "IGNORED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "NEW" => Ok(FileStatus::New),
            "PROCESSING" => Ok(FileStatus::Processing),
            "CLASSIFIED" => Ok(FileStatus::Classified),
            "READY_TO_MOVE" => Ok(FileStatus::ReadyToMove),
            "MOVING" => Ok(FileStatus::Moving),
            "MOVED" => Ok(FileStatus::Moved),
            "ERROR" => Ok(FileStatus::Error),
            "RETRY" => Ok(FileStatus::Retry),
            "IGNORED" => Ok(FileStatus::Ignored),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }

    /// MOVED and IGNORED never transition again; ERROR only via an explicit
    /// reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Moved | FileStatus::Ignored | FileStatus::Error)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per discovered file, keyed by content hash.
#[derive(Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TrackedFile {
    pub hash: FileHash,
    pub original_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub status: FileStatus,

    pub suggested_category: Option<String>,
    pub confidence: Option<f64>,
    pub classified_at: Option<DateTime<Utc>>,

    pub category: Option<String>,
    pub target_path: Option<PathBuf>,

    pub moved_to_path: Option<PathBuf>,
    pub moved_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,

    pub audit: AuditFields,
    /// Row version for optimistic concurrency; bumped on every update.
    pub version: i64,
}

impl TrackedFile {
    pub fn new(
        hash: FileHash,
        original_path: PathBuf,
        file_size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let file_name = original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            hash,
            original_path,
            file_name,
            file_size,
            status: FileStatus::New,
            suggested_category: None,
            confidence: None,
            classified_at: None,
            category: None,
            target_path: None,
            moved_to_path: None,
            moved_at: None,
            retry_count: 0,
            last_error: None,
            last_error_at: None,
            audit: AuditFields::new(now),
            version: 0,
        }
    }
}

impl fmt::Debug for TrackedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedFile")
            .field("hash", &self.hash)
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size)
            .field("status", &self.status)
            .field("suggested_category", &self.suggested_category)
            .field("confidence", &self.confidence)
            .field("category", &self.category)
            .field("retry_count", &self.retry_count)
            .field("active", &self.audit.active)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            FileStatus::New,
            FileStatus::Processing,
            FileStatus::Classified,
            FileStatus::ReadyToMove,
            FileStatus::Moving,
            FileStatus::Moved,
            FileStatus::Error,
            FileStatus::Retry,
            FileStatus::Ignored,
        ] {
            assert_eq!(FileStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(FileStatus::parse("DONE").is_err());
    }

    #[test]
    fn new_file_starts_at_new_with_zero_retries() {
        let hash = FileHash::from_digest("0".repeat(64));
        let file = TrackedFile::new(
            hash,
            PathBuf::from("/watch/show.mkv"),
            42,
            Utc::now(),
        );
        assert_eq!(file.status, FileStatus::New);
        assert_eq!(file.file_name, "show.mkv");
        assert_eq!(file.retry_count, 0);
        assert!(file.audit.active);
    }
}
