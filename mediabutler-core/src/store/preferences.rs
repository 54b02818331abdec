//! Read queries over `user_preferences`.

use sqlx::Row;

use mediabutler_model::PreferenceValue;

use crate::error::Result;

use super::Store;

impl Store {
    pub async fn get_preference(&self, key: &str) -> Result<Option<PreferenceValue>> {
        let row = sqlx::query(
            "SELECT value_json FROM user_preferences WHERE key = ? AND active = 1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| {
            let raw: String = row.try_get("value_json")?;
            Ok(serde_json::from_str(&raw)?)
        })
        .transpose()
    }
}
