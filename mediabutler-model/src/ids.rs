use crate::error::{ModelError, Result};
use uuid::Uuid;

/// Strongly typed content hash identifying a tracked file.
///
/// Always the lowercase 64-hex encoding of a SHA-256 digest; construction
/// validates shape so downstream code can treat the inner string as opaque.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct FileHash(String);

impl FileHash {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.len() != 64
            || !value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(ModelError::InvalidHash(value));
        }
        Ok(FileHash(value))
    }

    /// Wraps a digest already known to be 64 lowercase hex characters.
    pub fn from_digest(hex: String) -> Self {
        debug_assert_eq!(hex.len(), 64);
        FileHash(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for FileHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed ID for batch organize jobs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BatchJobId(pub Uuid);

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchJobId {
    pub fn new() -> Self {
        BatchJobId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed ID for rollback points.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RollbackId(pub Uuid);

impl Default for RollbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackId {
    pub fn new() -> Self {
        RollbackId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for RollbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_sha256_hex() {
        let hex = "a".repeat(64);
        assert!(FileHash::parse(hex).is_ok());
    }

    #[test]
    fn rejects_uppercase_and_short_input() {
        assert!(FileHash::parse("A".repeat(64)).is_err());
        assert!(FileHash::parse("abc123").is_err());
        assert!(FileHash::parse(format!("{}g", "a".repeat(63))).is_err());
    }
}
