use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::ids::FileHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(ModelError::UnknownLogLevel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record; never mutated after insert.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ProcessingLog {
    pub id: i64,
    pub file_hash: FileHash,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub details_json: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLog {
    /// Builder for a record not yet persisted; the store assigns `id` and
    /// stamps `created_at` on commit.
    pub fn entry(
        file_hash: FileHash,
        level: LogLevel,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            file_hash,
            level,
            category: category.into(),
            message: message.into(),
            details_json: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details_json = Some(details);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
