use std::io;

use thiserror::Error;

/// Stable taxonomy of failure kinds exposed at the contract boundary.
///
/// API adapters and the error classifier dispatch on this, never on the
/// concrete error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    IllegalTransition,
    Conflict,
    Permission,
    Path,
    Space,
    Transient,
    ClassifierTimeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::IllegalTransition => "ILLEGAL_TRANSITION",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Permission => "PERMISSION",
            ErrorKind::Path => "PATH",
            ErrorKind::Space => "SPACE",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::ClassifierTimeout => "CLASSIFIER_TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ButlerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal transition for {hash}: {from} -> {to}")]
    IllegalTransition {
        hash: String,
        from: String,
        to: String,
    },

    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("path error: {0}")]
    Path(String),

    #[error("insufficient space: required {required} bytes, available {available}")]
    Space { required: u64, available: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("classifier exceeded {deadline_ms} ms deadline")]
    ClassifierTimeout { deadline_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(#[from] mediabutler_model::ModelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ButlerError {
    /// Collapse the concrete variant into the contract taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ButlerError::Validation(_) | ButlerError::Model(_) => ErrorKind::Validation,
            ButlerError::NotFound(_) => ErrorKind::NotFound,
            ButlerError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            ButlerError::Conflict(_) => ErrorKind::Conflict,
            ButlerError::Permission(_) => ErrorKind::Permission,
            ButlerError::Path(_) => ErrorKind::Path,
            ButlerError::Space { .. } => ErrorKind::Space,
            ButlerError::Transient(_) => ErrorKind::Transient,
            ButlerError::ClassifierTimeout { .. } => ErrorKind::ClassifierTimeout,
            ButlerError::Io(err) => io_kind(err),
            ButlerError::Database(_)
            | ButlerError::Serialization(_)
            | ButlerError::Internal(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::ClassifierTimeout | ErrorKind::Conflict
        )
    }
}

fn io_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidFilename => ErrorKind::Path,
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => ErrorKind::Space,
        io::ErrorKind::ResourceBusy
        | io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock => ErrorKind::Transient,
        _ => ErrorKind::Transient,
    }
}

pub type Result<T> = std::result::Result<T, ButlerError>;
