use chrono::{DateTime, Utc};

/// Audit fields shared by every persisted entity.
///
/// Stamping happens in the store's commit path, not here; entities carry the
/// values so reads round-trip without loss. `active = false` is the soft
/// delete flag and default read paths filter on it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct AuditFields {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub note: Option<String>,
    pub active: bool,
}

impl AuditFields {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            note: None,
            active: true,
        }
    }
}
