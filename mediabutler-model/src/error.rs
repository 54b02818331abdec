use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid file hash: {0}")]
    InvalidHash(String),

    #[error("unknown file status: {0}")]
    UnknownStatus(String),

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),

    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
