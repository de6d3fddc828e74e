//! Runtime configuration: operator-tunable key/value pairs.
//!
//! Values are stored as strings with no validation. Typed access goes
//! through [`RuntimeConfig`], which falls back to defaults per key.

use crate::error::Result;
use crate::model::RuntimeConfig;

impl super::Db {
    /// Raw value for `key`, if set.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Raw value for `key`, or `default` when unset.
    pub async fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        tracing::info!(key, value, "config updated");
        Ok(())
    }

    /// Every stored key/value pair, sorted by key.
    pub async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        Ok(
            sqlx::query_as("SELECT key, value FROM config ORDER BY key ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Typed snapshot of the tunables workers read for each job.
    pub async fn runtime_config(&self) -> Result<RuntimeConfig> {
        let entries = self.list_settings().await?;
        Ok(RuntimeConfig::from_entries(
            entries.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ))
    }
}
