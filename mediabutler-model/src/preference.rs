use crate::audit::AuditFields;

/// Typed value for a stored user preference.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PreferenceValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Json(serde_json::Value),
}

/// Key/value user preference row. Persisted for the UI's benefit; no core
/// pipeline behavior reads these.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct UserPreference {
    pub key: String,
    pub value: PreferenceValue,
    pub audit: AuditFields,
}
