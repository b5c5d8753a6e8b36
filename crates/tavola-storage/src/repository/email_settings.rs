//! Email settings and quota counter repository

use crate::db::DatabasePool;
use crate::models::{EmailSettings, SETTINGS_ROW_ID};
use async_trait::async_trait;
use chrono::NaiveDate;
use tavola_common::{Error, Result};

/// Settings store trait
///
/// The counter operations are single statements evaluated by the database,
/// so concurrent senders cannot lose an increment or reset twice. Every
/// statement targets the row keyed by [`SETTINGS_ROW_ID`].
#[async_trait]
pub trait EmailSettingsRepository: Send + Sync {
    async fn get(&self) -> Result<Option<EmailSettings>>;
    /// Zero the daily counter if it was last reset before `today`; returns whether it did
    async fn reset_daily_count_if_stale(&self, today: NaiveDate) -> Result<bool>;
    /// Add one to the daily counter and return the new value
    async fn increment_daily_count(&self) -> Result<Option<i32>>;
}

/// Database settings repository
pub struct DbEmailSettingsRepository {
    pool: DatabasePool,
}

impl DbEmailSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailSettingsRepository for DbEmailSettingsRepository {
    async fn get(&self) -> Result<Option<EmailSettings>> {
        sqlx::query_as::<_, EmailSettings>(
            "SELECT * FROM email_settings WHERE id = $1",
        )
        .bind(SETTINGS_ROW_ID)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn reset_daily_count_if_stale(&self, today: NaiveDate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_settings SET
                emails_sent_today = 0,
                last_reset_date = $1,
                updated_at = NOW()
            WHERE id = $2 AND last_reset_date <> $1
            "#,
        )
        .bind(today)
        .bind(SETTINGS_ROW_ID)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_daily_count(&self) -> Result<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE email_settings SET
                emails_sent_today = emails_sent_today + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING emails_sent_today
            "#,
        )
        .bind(SETTINGS_ROW_ID)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|r| r.0))
    }
}
