//! Retry queue repository

use crate::db::DatabasePool;
use crate::models::{NewQueuedEmail, QueueStats, QueuedEmail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tavola_common::types::QueueId;
use tavola_common::{Error, Result};
use uuid::Uuid;

/// Retry queue repository trait
///
/// Transitions are guarded by the expected source status and report whether
/// the row changed: `mark_processing` only claims `pending` rows, and the
/// outcome transitions only act on `processing` rows. A claim whose sweep
/// never reported back is handed back with `release_stale_claims`.
#[async_trait]
pub trait EmailQueueRepository: Send + Sync {
    async fn insert(&self, input: NewQueuedEmail) -> Result<QueuedEmail>;
    async fn get(&self, id: QueueId) -> Result<Option<QueuedEmail>>;
    /// Pending rows due at `now`, highest priority first, oldest first within a priority
    async fn select_pending_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>>;
    async fn mark_processing(&self, id: QueueId, now: DateTime<Utc>) -> Result<bool>;
    /// Return `processing` rows claimed before `claimed_before` to `pending`
    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64>;
    async fn mark_sent(&self, id: QueueId, attempts: i32) -> Result<bool>;
    async fn reschedule(
        &self,
        id: QueueId,
        attempts: i32,
        error: &str,
        process_after: DateTime<Utc>,
    ) -> Result<bool>;
    async fn mark_failed(&self, id: QueueId, attempts: i32, error: &str) -> Result<bool>;
    async fn cancel(&self, id: QueueId) -> Result<bool>;
    async fn stats(&self) -> Result<QueueStats>;
}

/// Database retry queue repository
pub struct DbEmailQueueRepository {
    pool: DatabasePool,
}

impl DbEmailQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailQueueRepository for DbEmailQueueRepository {
    async fn insert(&self, input: NewQueuedEmail) -> Result<QueuedEmail> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, QueuedEmail>(
            r#"
            INSERT INTO email_queue (
                id, template_key, recipient_email, recipient_name, email_data,
                booking_id, contact_id, scheduled_for, priority, status,
                current_attempts, max_attempts, error_message, process_after,
                idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12, $13, $14, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.template_key)
        .bind(&input.recipient_email)
        .bind(&input.recipient_name)
        .bind(&input.email_data)
        .bind(input.booking_id)
        .bind(input.contact_id)
        .bind(input.scheduled_for)
        .bind(input.priority)
        .bind(input.current_attempts)
        .bind(input.max_attempts)
        .bind(&input.error_message)
        .bind(input.process_after)
        .bind(input.idempotency_key)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: QueueId) -> Result<Option<QueuedEmail>> {
        sqlx::query_as::<_, QueuedEmail>("SELECT * FROM email_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn select_pending_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>> {
        sqlx::query_as::<_, QueuedEmail>(
            r#"
            SELECT * FROM email_queue
            WHERE status = 'pending'
              AND scheduled_for <= $1
              AND process_after <= $1
            ORDER BY priority DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn mark_processing(&self, id: QueueId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'processing',
                last_attempt_at = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'pending',
                updated_at = NOW()
            WHERE status = 'processing'
              AND (last_attempt_at IS NULL OR last_attempt_at < $1)
            "#,
        )
        .bind(claimed_before)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn mark_sent(&self, id: QueueId, attempts: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'sent',
                current_attempts = $2,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: QueueId,
        attempts: i32,
        error: &str,
        process_after: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'pending',
                current_attempts = $2,
                error_message = $3,
                process_after = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(process_after)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: QueueId, attempts: i32, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'failed',
                current_attempts = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, id: QueueId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET
                status = 'cancelled',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'sent') as sent,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') as cancelled
            FROM email_queue
            "#,
        )
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(QueueStats {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            cancelled: row.get::<Option<i64>, _>("cancelled").unwrap_or(0),
        })
    }
}
