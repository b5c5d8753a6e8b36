//! In-process repository implementations
//!
//! These back the `log` development provider and the test suites. They keep
//! the same transition guards as the database repositories.

use crate::models::{
    DeliveryLogEntry, DeliveryStatus, EmailSettings, EmailTemplate, LogStats, NewDeliveryLog,
    NewQueuedEmail, QueueStats, QueueStatus, QueuedEmail, RestaurantSettings,
};
use crate::repository::{
    DeliveryLogRepository, EmailQueueRepository, EmailSettingsRepository, RestaurantRepository,
    TemplateRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tavola_common::types::{LogId, QueueId};
use tavola_common::{Error, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory delivery log
#[derive(Default)]
pub struct MemoryDeliveryLog {
    rows: RwLock<Vec<DeliveryLogEntry>>,
}

impl MemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed row, e.g. one left behind by a crashed sender
    pub async fn seed(&self, entry: DeliveryLogEntry) {
        self.rows.write().await.push(entry);
    }

    /// Snapshot of all rows in insertion order
    pub async fn entries(&self) -> Vec<DeliveryLogEntry> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl DeliveryLogRepository for MemoryDeliveryLog {
    async fn insert(&self, input: NewDeliveryLog) -> Result<DeliveryLogEntry> {
        let entry = DeliveryLogEntry {
            id: Uuid::now_v7(),
            template_key: input.template_key,
            recipient_email: input.recipient_email,
            recipient_name: input.recipient_name,
            subject: input.subject,
            status: DeliveryStatus::Pending.to_string(),
            provider_message_id: None,
            error_message: None,
            booking_id: input.booking_id,
            contact_id: input.contact_id,
            idempotency_key: input.idempotency_key,
            attempt: input.attempt,
            created_at: Utc::now(),
            sent_at: None,
        };
        self.rows.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: LogId) -> Result<Option<DeliveryLogEntry>> {
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn mark_sent(
        &self,
        id: LogId,
        provider_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows
            .iter_mut()
            .find(|r| r.id == id && r.status_enum() == Some(DeliveryStatus::Pending))
        {
            Some(row) => {
                row.status = DeliveryStatus::Sent.to_string();
                row.provider_message_id = provider_message_id.map(str::to_string);
                row.error_message = None;
                row.sent_at = Some(sent_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, id: LogId, error: &str) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows
            .iter_mut()
            .find(|r| r.id == id && r.status_enum() == Some(DeliveryStatus::Pending))
        {
            Some(row) => {
                row.status = DeliveryStatus::Failed.to_string();
                row.error_message = Some(error.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_stuck_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>> {
        let mut stuck: Vec<DeliveryLogEntry> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| {
                r.status_enum() == Some(DeliveryStatus::Pending) && r.created_at < created_before
            })
            .cloned()
            .collect();
        stuck.sort_by_key(|r| r.created_at);
        stuck.truncate(limit.max(0) as usize);
        Ok(stuck)
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.sent_at.map(|t| t >= since).unwrap_or(false))
            .count() as i64)
    }

    async fn stats(&self) -> Result<LogStats> {
        let mut stats = LogStats::default();
        for row in self.rows.read().await.iter() {
            match row.status_enum() {
                Some(DeliveryStatus::Pending) => stats.pending += 1,
                Some(DeliveryStatus::Sent) => stats.sent += 1,
                Some(DeliveryStatus::Failed) => stats.failed += 1,
                _ => stats.other += 1,
            }
        }
        Ok(stats)
    }
}

/// In-memory retry queue
#[derive(Default)]
pub struct MemoryEmailQueue {
    rows: RwLock<Vec<QueuedEmail>>,
    failing: AtomicBool,
}

impl MemoryEmailQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, simulating an unavailable store
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<QueuedEmail> {
        self.rows.read().await.clone()
    }

    async fn transition(
        &self,
        id: QueueId,
        from: QueueStatus,
        apply: impl FnOnce(&mut QueuedEmail) + Send,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows
            .iter_mut()
            .find(|r| r.id == id && r.status_enum() == Some(from))
        {
            Some(row) => {
                apply(row);
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EmailQueueRepository for MemoryEmailQueue {
    async fn insert(&self, input: NewQueuedEmail) -> Result<QueuedEmail> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Database("email_queue unavailable".to_string()));
        }

        let now = Utc::now();
        let row = QueuedEmail {
            id: Uuid::now_v7(),
            template_key: input.template_key,
            recipient_email: input.recipient_email,
            recipient_name: input.recipient_name,
            email_data: input.email_data,
            booking_id: input.booking_id,
            contact_id: input.contact_id,
            scheduled_for: input.scheduled_for,
            priority: input.priority,
            status: QueueStatus::Pending.to_string(),
            current_attempts: input.current_attempts,
            max_attempts: input.max_attempts,
            error_message: input.error_message,
            process_after: input.process_after,
            idempotency_key: input.idempotency_key,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.write().await.push(row.clone());
        Ok(row)
    }

    async fn get(&self, id: QueueId) -> Result<Option<QueuedEmail>> {
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn select_pending_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>> {
        let mut due: Vec<QueuedEmail> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for rows created in the same instant
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_processing(&self, id: QueueId, now: DateTime<Utc>) -> Result<bool> {
        self.transition(id, QueueStatus::Pending, |row| {
            row.status = QueueStatus::Processing.to_string();
            row.last_attempt_at = Some(now);
        })
        .await
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        let mut released = 0;
        for row in self.rows.write().await.iter_mut() {
            let stale = row
                .last_attempt_at
                .map_or(true, |claimed| claimed < claimed_before);
            if row.status_enum() == Some(QueueStatus::Processing) && stale {
                row.status = QueueStatus::Pending.to_string();
                row.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn mark_sent(&self, id: QueueId, attempts: i32) -> Result<bool> {
        self.transition(id, QueueStatus::Processing, |row| {
            row.status = QueueStatus::Sent.to_string();
            row.current_attempts = attempts;
            row.error_message = None;
        })
        .await
    }

    async fn reschedule(
        &self,
        id: QueueId,
        attempts: i32,
        error: &str,
        process_after: DateTime<Utc>,
    ) -> Result<bool> {
        let error = error.to_string();
        self.transition(id, QueueStatus::Processing, move |row| {
            row.status = QueueStatus::Pending.to_string();
            row.current_attempts = attempts;
            row.error_message = Some(error);
            row.process_after = process_after;
        })
        .await
    }

    async fn mark_failed(&self, id: QueueId, attempts: i32, error: &str) -> Result<bool> {
        let error = error.to_string();
        self.transition(id, QueueStatus::Processing, move |row| {
            row.status = QueueStatus::Failed.to_string();
            row.current_attempts = attempts;
            row.error_message = Some(error);
        })
        .await
    }

    async fn cancel(&self, id: QueueId) -> Result<bool> {
        self.transition(id, QueueStatus::Pending, |row| {
            row.status = QueueStatus::Cancelled.to_string();
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for row in self.rows.read().await.iter() {
            match row.status_enum() {
                Some(QueueStatus::Pending) => stats.pending += 1,
                Some(QueueStatus::Processing) => stats.processing += 1,
                Some(QueueStatus::Sent) => stats.sent += 1,
                Some(QueueStatus::Failed) => stats.failed += 1,
                Some(QueueStatus::Cancelled) => stats.cancelled += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

/// In-memory template store
#[derive(Default)]
pub struct MemoryTemplates {
    templates: RwLock<HashMap<String, EmailTemplate>>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = EmailTemplate>) -> Self {
        let map = templates
            .into_iter()
            .map(|t| (t.template_key.clone(), t))
            .collect();
        Self {
            templates: RwLock::new(map),
        }
    }

    pub async fn upsert(&self, template: EmailTemplate) {
        self.templates
            .write()
            .await
            .insert(template.template_key.clone(), template);
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplates {
    async fn get_active(&self, template_key: &str) -> Result<Option<EmailTemplate>> {
        Ok(self
            .templates
            .read()
            .await
            .get(template_key)
            .filter(|t| t.is_active)
            .cloned())
    }
}

/// In-memory settings singleton
#[derive(Default)]
pub struct MemoryEmailSettings {
    settings: RwLock<Option<EmailSettings>>,
    failing: AtomicBool,
}

impl MemoryEmailSettings {
    pub fn new(settings: EmailSettings) -> Self {
        Self {
            settings: RwLock::new(Some(settings)),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every call fail, simulating an unavailable settings store
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Option<EmailSettings> {
        self.settings.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Database("email_settings unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EmailSettingsRepository for MemoryEmailSettings {
    async fn get(&self) -> Result<Option<EmailSettings>> {
        self.check_available()?;
        Ok(self.settings.read().await.clone())
    }

    async fn reset_daily_count_if_stale(&self, today: NaiveDate) -> Result<bool> {
        self.check_available()?;
        let mut guard = self.settings.write().await;
        match guard.as_mut() {
            Some(s) if s.last_reset_date != today => {
                s.emails_sent_today = 0;
                s.last_reset_date = today;
                s.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_daily_count(&self) -> Result<Option<i32>> {
        self.check_available()?;
        let mut guard = self.settings.write().await;
        Ok(guard.as_mut().map(|s| {
            s.emails_sent_today += 1;
            s.updated_at = Utc::now();
            s.emails_sent_today
        }))
    }
}

/// In-memory restaurant settings
#[derive(Default)]
pub struct MemoryRestaurant {
    settings: RwLock<Option<RestaurantSettings>>,
}

impl MemoryRestaurant {
    pub fn new(settings: Option<RestaurantSettings>) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl RestaurantRepository for MemoryRestaurant {
    async fn get(&self) -> Result<Option<RestaurantSettings>> {
        Ok(self.settings.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn new_log(attempt: i32) -> NewDeliveryLog {
        NewDeliveryLog {
            template_key: "booking_confirmation".to_string(),
            recipient_email: "guest@example.com".to_string(),
            recipient_name: Some("Ada".to_string()),
            subject: "Your booking".to_string(),
            booking_id: None,
            contact_id: None,
            idempotency_key: None,
            attempt,
        }
    }

    fn new_queued(priority: i32) -> NewQueuedEmail {
        let now = Utc::now();
        NewQueuedEmail {
            template_key: "booking_confirmation".to_string(),
            recipient_email: "guest@example.com".to_string(),
            recipient_name: None,
            email_data: serde_json::json!({ "priority": priority }),
            booking_id: None,
            contact_id: None,
            scheduled_for: now,
            priority,
            current_attempts: 3,
            max_attempts: 5,
            error_message: None,
            process_after: now,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_log_terminal_rows_are_not_overwritten() {
        let log = MemoryDeliveryLog::new();
        let entry = log.insert(new_log(1)).await.unwrap();

        assert!(log.mark_sent(entry.id, Some("msg-1"), Utc::now()).await.unwrap());
        assert!(!log.mark_failed(entry.id, "late failure").await.unwrap());
        assert!(!log.mark_sent(entry.id, Some("msg-2"), Utc::now()).await.unwrap());

        let row = log.get(entry.id).await.unwrap().unwrap();
        assert_eq!(row.status_enum(), Some(DeliveryStatus::Sent));
        assert_eq!(row.provider_message_id.as_deref(), Some("msg-1"));
        assert_eq!(row.error_message, None);
    }

    #[tokio::test]
    async fn test_list_stuck_pending_respects_cutoff() {
        let log = MemoryDeliveryLog::new();
        let mut old = log.insert(new_log(1)).await.unwrap();
        old.created_at = Utc::now() - Duration::minutes(30);
        let old_id = old.id;
        log.rows.write().await[0] = old;
        log.insert(new_log(1)).await.unwrap();

        let stuck = log
            .list_stuck_pending(Utc::now() - Duration::minutes(5), 10)
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, old_id);
    }

    #[tokio::test]
    async fn test_queue_selection_order_and_limit() {
        let queue = MemoryEmailQueue::new();
        let a = queue.insert(new_queued(3)).await.unwrap();
        let b = queue.insert(new_queued(5)).await.unwrap();
        let c = queue.insert(new_queued(5)).await.unwrap();
        let d = queue.insert(new_queued(1)).await.unwrap();

        let due = queue.select_pending_due(Utc::now(), 10).await.unwrap();
        let order: Vec<_> = due.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![b.id, c.id, a.id, d.id]);

        let due = queue.select_pending_due(Utc::now(), 2).await.unwrap();
        assert_eq!(due.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_transitions_are_guarded() {
        let queue = MemoryEmailQueue::new();
        let row = queue.insert(new_queued(5)).await.unwrap();

        // Outcome transitions need a claimed row
        assert!(!queue.mark_sent(row.id, 4).await.unwrap());

        assert!(queue.mark_processing(row.id, Utc::now()).await.unwrap());
        assert!(!queue.mark_processing(row.id, Utc::now()).await.unwrap());
        assert!(!queue.cancel(row.id).await.unwrap());

        assert!(queue.mark_failed(row.id, 5, "boom").await.unwrap());
        let stored = queue.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Failed));
        assert_eq!(stored.current_attempts, 5);
        assert!(queue
            .select_pending_due(Utc::now(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stale_claims_are_released() {
        let queue = MemoryEmailQueue::new();
        let abandoned = queue.insert(new_queued(5)).await.unwrap();
        let active = queue.insert(new_queued(5)).await.unwrap();

        let now = Utc::now();
        assert!(queue
            .mark_processing(abandoned.id, now - Duration::minutes(20))
            .await
            .unwrap());
        assert!(queue.mark_processing(active.id, now).await.unwrap());

        let released = queue
            .release_stale_claims(now - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(released, 1);

        let abandoned = queue.get(abandoned.id).await.unwrap().unwrap();
        assert_eq!(abandoned.status_enum(), Some(QueueStatus::Pending));
        assert_eq!(abandoned.current_attempts, 3);
        let active = queue.get(active.id).await.unwrap().unwrap();
        assert_eq!(active.status_enum(), Some(QueueStatus::Processing));
    }

    #[tokio::test]
    async fn test_hourly_count_includes_webhook_statuses() {
        let log = MemoryDeliveryLog::new();
        let sent = log.insert(new_log(1)).await.unwrap();
        assert!(log.mark_sent(sent.id, Some("msg-1"), Utc::now()).await.unwrap());

        let mut delivered = log.insert(new_log(1)).await.unwrap();
        assert!(log
            .mark_sent(delivered.id, Some("msg-2"), Utc::now())
            .await
            .unwrap());
        delivered = log.get(delivered.id).await.unwrap().unwrap();
        delivered.status = DeliveryStatus::Delivered.to_string();
        log.rows.write().await[1] = delivered;

        // Never accepted, so not counted
        log.insert(new_log(1)).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(log.count_sent_since(since).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let queue = MemoryEmailQueue::new();
        let a = queue.insert(new_queued(5)).await.unwrap();
        queue.insert(new_queued(5)).await.unwrap();
        assert!(queue.cancel(a.id).await.unwrap());

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                cancelled: 1,
                ..Default::default()
            }
        );
        assert_eq!(stats.total(), 2);
    }

    #[tokio::test]
    async fn test_settings_counter_reset_and_increment() {
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let settings = MemoryEmailSettings::new(EmailSettings {
            emails_sent_today: 999,
            last_reset_date: yesterday,
            ..Default::default()
        });

        let today = Utc::now().date_naive();
        assert!(settings.reset_daily_count_if_stale(today).await.unwrap());
        assert!(!settings.reset_daily_count_if_stale(today).await.unwrap());
        assert_eq!(settings.increment_daily_count().await.unwrap(), Some(1));

        settings.set_failing(true);
        assert!(settings.get().await.is_err());
    }

    #[tokio::test]
    async fn test_inactive_templates_are_hidden() {
        let mut inactive = EmailTemplate::new("old", "Subject", "<p>Body</p>");
        inactive.is_active = false;
        let templates = MemoryTemplates::with_templates([
            inactive,
            EmailTemplate::new("booking_confirmation", "Confirmed", "<p>Hi</p>"),
        ]);

        assert!(templates.get_active("old").await.unwrap().is_none());
        assert!(templates
            .get_active("booking_confirmation")
            .await
            .unwrap()
            .is_some());
    }
}
