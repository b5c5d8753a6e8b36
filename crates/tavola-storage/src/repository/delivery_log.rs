//! Delivery log repository

use crate::db::DatabasePool;
use crate::models::{DeliveryLogEntry, LogStats, NewDeliveryLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tavola_common::types::LogId;
use tavola_common::{Error, Result};
use uuid::Uuid;

/// Delivery log repository trait
///
/// `mark_sent` and `mark_failed` only touch rows still in `pending`, so a
/// terminal row is never overwritten. They return whether a row changed.
#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn insert(&self, input: NewDeliveryLog) -> Result<DeliveryLogEntry>;
    async fn get(&self, id: LogId) -> Result<Option<DeliveryLogEntry>>;
    async fn mark_sent(
        &self,
        id: LogId,
        provider_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn mark_failed(&self, id: LogId, error: &str) -> Result<bool>;
    /// Pending rows created before `created_before`, oldest first
    async fn list_stuck_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>>;
    /// Rows accepted by the provider since `since`, whatever webhook status they moved on to
    async fn count_sent_since(&self, since: DateTime<Utc>) -> Result<i64>;
    async fn stats(&self) -> Result<LogStats>;
}

/// Database delivery log repository
pub struct DbDeliveryLogRepository {
    pool: DatabasePool,
}

impl DbDeliveryLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLogRepository for DbDeliveryLogRepository {
    async fn insert(&self, input: NewDeliveryLog) -> Result<DeliveryLogEntry> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            INSERT INTO email_logs (
                id, template_key, recipient_email, recipient_name, subject,
                status, booking_id, contact_id, idempotency_key, attempt, created_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.template_key)
        .bind(&input.recipient_email)
        .bind(&input.recipient_name)
        .bind(&input.subject)
        .bind(input.booking_id)
        .bind(input.contact_id)
        .bind(input.idempotency_key)
        .bind(input.attempt)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: LogId) -> Result<Option<DeliveryLogEntry>> {
        sqlx::query_as::<_, DeliveryLogEntry>("SELECT * FROM email_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn mark_sent(
        &self,
        id: LogId,
        provider_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_logs SET
                status = 'sent',
                provider_message_id = $2,
                sent_at = $3,
                error_message = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .bind(sent_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: LogId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_logs SET
                status = 'failed',
                error_message = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stuck_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>> {
        sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            SELECT * FROM email_logs
            WHERE status = 'pending'
              AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM email_logs WHERE sent_at >= $1",
        )
        .bind(since)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(count.0)
    }

    async fn stats(&self) -> Result<LogStats> {
        let row: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'sent'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status NOT IN ('pending', 'sent', 'failed'))
            FROM email_logs
            "#,
        )
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(LogStats {
            pending: row.0.unwrap_or(0),
            sent: row.1.unwrap_or(0),
            failed: row.2.unwrap_or(0),
            other: row.3.unwrap_or(0),
        })
    }
}
