//! Cross-process control signals.
//!
//! `queuectl worker stop` in one process sets the `stop` key; supervisors in
//! other processes poll it and drain their workers.

use crate::error::Result;

const STOP_KEY: &str = "stop";

impl super::Db {
    /// Ask every running supervisor to drain and stop.
    pub async fn request_stop(&self) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO control (key, value) VALUES (?1, '1')")
            .bind(STOP_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_stop(&self) -> Result<()> {
        sqlx::query("DELETE FROM control WHERE key = ?1")
            .bind(STOP_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn stop_requested(&self) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM control WHERE key = ?1")
            .bind(STOP_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matches!(row, Some((value,)) if value == "1"))
    }
}
