//! Reconciliation sweeps
//!
//! The core never schedules itself. The server's ticker or an operator
//! action calls these, and overlapping invocations are tolerated because a
//! queue row must be claimed (`pending` -> `processing`) before it is sent.
//! A claim older than the stuck grace period is treated as abandoned.

use crate::error::SendError;
use crate::service::{EmailSendRequest, EmailService, LogTarget};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use tavola_storage::models::QueuedEmail;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Counters returned by a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
}

impl Add for SweepReport {
    type Output = SweepReport;

    fn add(self, other: SweepReport) -> SweepReport {
        SweepReport {
            processed: self.processed + other.processed,
            success: self.success + other.success,
            failed: self.failed + other.failed,
        }
    }
}

impl AddAssign for SweepReport {
    fn add_assign(&mut self, other: SweepReport) {
        *self = *self + other;
    }
}

impl EmailService {
    /// Retry due queue rows, one attempt each
    ///
    /// Rows are taken highest priority first and oldest first within a
    /// priority. A failure increments the lifetime attempt count; once it
    /// reaches the row's ceiling the row is parked as `failed`. A quota
    /// refusal pushes the row out without spending an attempt. Rows claimed
    /// longer ago than the stuck grace period belong to a sweep that never
    /// finished and are taken back first.
    #[instrument(skip(self))]
    pub async fn process_email_queue(&self) -> SweepReport {
        let policy = &self.options.policy;
        let mut report = SweepReport::default();

        match self
            .stores
            .queue
            .release_stale_claims(Utc::now() - policy.stuck_grace())
            .await
        {
            Ok(0) => {}
            Ok(released) => warn!(released, "Released abandoned retry queue claims"),
            Err(e) => error!(error = %e, "Failed to release abandoned retry queue claims"),
        }

        let rows = match self
            .stores
            .queue
            .select_pending_due(Utc::now(), policy.queue_batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to load retry queue");
                return report;
            }
        };

        for row in rows {
            match self.stores.queue.mark_processing(row.id, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(queue_id = %row.id, "Queue row claimed by another sweep, skipping");
                    continue;
                }
                Err(e) => {
                    error!(queue_id = %row.id, error = %e, "Failed to claim queue row");
                    continue;
                }
            }

            report.processed += 1;
            if self.retry_queued(&row).await {
                report.success += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                success = report.success,
                failed = report.failed,
                "Retry queue processed"
            );
        }
        report
    }

    async fn retry_queued(&self, row: &QueuedEmail) -> bool {
        let policy = &self.options.policy;
        let request = EmailSendRequest::from_queued(row);
        let key = row.idempotency_key.unwrap_or_else(Uuid::new_v4);
        let attempt = row.current_attempts + 1;

        let report = self
            .attempt_once(&request, key, LogTarget::New { attempt })
            .await;

        let outcome = match report.result {
            Ok(receipt) => {
                info!(queue_id = %row.id, message_id = %receipt.message_id, "Queued email sent");
                self.stores.queue.mark_sent(row.id, attempt).await.map(|_| true)
            }
            Err(SendError::QuotaExceeded(reason)) => {
                warn!(queue_id = %row.id, reason = %reason, "Quota reached, postponing queued email");
                self.stores
                    .queue
                    .reschedule(
                        row.id,
                        row.current_attempts,
                        &reason,
                        Utc::now() + policy.queue_retry_after(),
                    )
                    .await
                    .map(|_| false)
            }
            Err(err) if attempt >= row.max_attempts => {
                error!(
                    queue_id = %row.id,
                    attempts = attempt,
                    error = %err,
                    "Queued email exceeded max attempts, marking as failed"
                );
                self.stores
                    .queue
                    .mark_failed(row.id, attempt, &err.to_string())
                    .await
                    .map(|_| false)
            }
            Err(err) => {
                let process_after = Utc::now() + policy.queue_retry_after();
                warn!(
                    queue_id = %row.id,
                    attempts = attempt,
                    error = %err,
                    process_after = %process_after,
                    "Queued email failed, rescheduled"
                );
                self.stores
                    .queue
                    .reschedule(row.id, attempt, &err.to_string(), process_after)
                    .await
                    .map(|_| false)
            }
        };

        outcome.unwrap_or_else(|e| {
            error!(queue_id = %row.id, error = %e, "Failed to update queue row");
            false
        })
    }

    /// Resolve delivery log rows stuck in `pending`
    ///
    /// Only rows older than the grace period are considered, so sends still in
    /// flight elsewhere are left alone. Each row is re-sent once and updated in
    /// place.
    #[instrument(skip(self))]
    pub async fn process_pending_emails(&self) -> SweepReport {
        let policy = &self.options.policy;
        let mut report = SweepReport::default();
        let cutoff = Utc::now() - policy.stuck_grace();

        let entries = match self
            .stores
            .log
            .list_stuck_pending(cutoff, policy.pending_batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to load stuck delivery log entries");
                return report;
            }
        };

        for entry in entries {
            report.processed += 1;
            let request = EmailSendRequest::from_log_entry(&entry);
            let key = entry.idempotency_key.unwrap_or_else(Uuid::new_v4);

            match self
                .attempt_once(&request, key, LogTarget::Existing(entry.id))
                .await
                .result
            {
                Ok(receipt) => {
                    info!(log_id = %entry.id, message_id = %receipt.message_id, "Stuck email sent");
                    report.success += 1;
                }
                Err(err) => {
                    warn!(log_id = %entry.id, error = %err, "Stuck email failed");
                    report.failed += 1;
                }
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                success = report.success,
                failed = report.failed,
                "Stuck delivery log entries processed"
            );
        }
        report
    }

    /// Run both sweeps and sum their counters
    pub async fn process_stuck_emails(&self) -> SweepReport {
        let queue = self.process_email_queue().await;
        let pending = self.process_pending_emails().await;
        queue + pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{default_settings, harness, harness_with, log_row, queued};
    use crate::transport::MemoryTransport;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tavola_storage::models::{DeliveryStatus, EmailSettings, QueueStatus};
    use tavola_storage::repository::EmailQueueRepository;

    #[test]
    fn test_report_sum() {
        let mut total = SweepReport {
            processed: 3,
            success: 2,
            failed: 1,
        };
        total += SweepReport {
            processed: 1,
            success: 0,
            failed: 1,
        };
        assert_eq!(
            total,
            SweepReport {
                processed: 4,
                success: 2,
                failed: 2
            }
        );
    }

    #[tokio::test]
    async fn test_queue_sweep_order_is_priority_then_age() {
        let h = harness(MemoryTransport::accepting());
        for (recipient, priority) in [
            ("a@example.com", 3),
            ("b@example.com", 5),
            ("c@example.com", 5),
            ("d@example.com", 1),
        ] {
            h.queue.insert(queued(recipient, priority, 3)).await.unwrap();
        }

        let report = h.service.process_email_queue().await;

        assert_eq!(
            report,
            SweepReport {
                processed: 4,
                success: 4,
                failed: 0
            }
        );
        let order: Vec<String> = h
            .transport
            .sent()
            .into_iter()
            .flat_map(|m| m.to)
            .collect();
        assert_eq!(
            order,
            vec![
                "b@example.com",
                "c@example.com",
                "a@example.com",
                "d@example.com"
            ]
        );

        for row in h.queue.entries().await {
            assert_eq!(row.status_enum(), Some(QueueStatus::Sent));
            assert_eq!(row.current_attempts, 4);
            assert_eq!(row.error_message, None);
        }

        // Each retry leaves its own log row, numbered after the earlier attempts
        let log = h.log.entries().await;
        assert_eq!(log.len(), 4);
        assert!(log.iter().all(|e| e.attempt == 4));
    }

    #[tokio::test]
    async fn test_queue_sweep_batch_limit() {
        let h = harness(MemoryTransport::accepting());
        for i in 0..21 {
            h.queue
                .insert(queued(&format!("guest{}@example.com", i), 5, 3))
                .await
                .unwrap();
        }

        let first = h.service.process_email_queue().await;
        assert_eq!(first.processed, 20);
        assert_eq!(h.queue.stats().await.unwrap().pending, 1);

        let second = h.service.process_email_queue().await;
        assert_eq!(second.processed, 1);
        assert_eq!(h.queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_failure_at_ceiling_parks_row_as_failed() {
        let h = harness(MemoryTransport::failing(SendError::Transient(
            "rate limited".to_string(),
        )));
        let row = h.queue.insert(queued("guest@example.com", 5, 4)).await.unwrap();

        let report = h.service.process_email_queue().await;
        assert_eq!(report.failed, 1);

        let stored = h.queue.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Failed));
        assert_eq!(stored.current_attempts, 5);
        assert_eq!(stored.error_message.as_deref(), Some("rate limited"));

        // Never selected again
        let report = h.service.process_email_queue().await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_failure_below_ceiling_is_rescheduled() {
        let h = harness(MemoryTransport::failing(SendError::Transient(
            "provider down".to_string(),
        )));
        let row = h.queue.insert(queued("guest@example.com", 5, 3)).await.unwrap();

        let before = Utc::now();
        h.service.process_email_queue().await;

        let stored = h.queue.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Pending));
        assert_eq!(stored.current_attempts, 4);
        assert_eq!(stored.error_message.as_deref(), Some("provider down"));
        assert!(stored.process_after >= before + Duration::minutes(5));
        assert!(stored.last_attempt_at.is_some());

        // Not due again until process_after has passed
        assert_eq!(h.service.process_email_queue().await.processed, 0);
    }

    #[tokio::test]
    async fn test_quota_refusal_does_not_spend_an_attempt() {
        let h = harness_with(
            MemoryTransport::accepting(),
            EmailSettings {
                emails_sent_today: 1000,
                ..default_settings()
            },
        );
        let row = h.queue.insert(queued("guest@example.com", 5, 4)).await.unwrap();

        let report = h.service.process_email_queue().await;
        assert_eq!(report.failed, 1);
        assert_eq!(h.transport.attempts(), 0);

        let stored = h.queue.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Pending));
        assert_eq!(stored.current_attempts, 4);
        assert!(stored.process_after > Utc::now());
    }

    #[tokio::test]
    async fn test_deferred_rows_keep_their_schedule() {
        let h = harness(MemoryTransport::accepting());
        let mut later = queued("guest@example.com", 9, 0);
        later.scheduled_for = Utc::now() + Duration::hours(2);
        h.queue.insert(later).await.unwrap();

        assert_eq!(h.service.process_email_queue().await.processed, 0);
    }

    #[tokio::test]
    async fn test_pending_sweep_resends_stuck_rows_in_place() {
        let h = harness(MemoryTransport::accepting());
        let stuck = log_row(
            "booking_confirmation",
            DeliveryStatus::Pending,
            Utc::now() - Duration::minutes(30),
        );
        let in_flight = log_row("booking_confirmation", DeliveryStatus::Pending, Utc::now());
        let already_sent = log_row(
            "booking_confirmation",
            DeliveryStatus::Sent,
            Utc::now() - Duration::hours(2),
        );
        let (stuck_id, in_flight_id, sent_id) = (stuck.id, in_flight.id, already_sent.id);
        h.log.seed(stuck.clone()).await;
        h.log.seed(in_flight).await;
        h.log.seed(already_sent).await;

        let report = h.service.process_pending_emails().await;
        assert_eq!(
            report,
            SweepReport {
                processed: 1,
                success: 1,
                failed: 0
            }
        );

        let log = h.log.entries().await;
        assert_eq!(log.len(), 3, "no new log rows for in-place resends");
        let find = |id: uuid::Uuid| log.iter().find(|e| e.id == id).unwrap();
        assert_eq!(find(stuck_id).status_enum(), Some(DeliveryStatus::Sent));
        assert!(find(stuck_id).provider_message_id.is_some());
        assert_eq!(find(in_flight_id).status_enum(), Some(DeliveryStatus::Pending));
        assert_eq!(find(sent_id).status_enum(), Some(DeliveryStatus::Sent));

        let sent = h.transport.sent();
        assert_eq!(sent[0].idempotency_key, stuck.idempotency_key);
    }

    #[tokio::test]
    async fn test_pending_sweep_marks_unrenderable_rows_failed() {
        let h = harness(MemoryTransport::accepting());
        let stuck = log_row(
            "retired_template",
            DeliveryStatus::Pending,
            Utc::now() - Duration::minutes(30),
        );
        let id = stuck.id;
        h.log.seed(stuck).await;

        let report = h.service.process_pending_emails().await;
        assert_eq!(report.failed, 1);

        let row = h
            .log
            .entries()
            .await
            .into_iter()
            .find(|e| e.id == id)
            .unwrap();
        assert_eq!(row.status_enum(), Some(DeliveryStatus::Failed));
        assert_eq!(
            row.error_message.as_deref(),
            Some("Email template not found: retired_template")
        );

        // Terminal rows are left alone by later sweeps
        assert_eq!(h.service.process_pending_emails().await.processed, 0);
    }

    #[tokio::test]
    async fn test_process_stuck_emails_sums_both_sweeps() {
        let h = harness(MemoryTransport::accepting());
        h.queue.insert(queued("queued@example.com", 5, 3)).await.unwrap();
        h.log
            .seed(log_row(
                "booking_confirmation",
                DeliveryStatus::Pending,
                Utc::now() - Duration::minutes(10),
            ))
            .await;

        let report = h.service.process_stuck_emails().await;
        assert_eq!(
            report,
            SweepReport {
                processed: 2,
                success: 2,
                failed: 0
            }
        );
        assert_eq!(h.settings.snapshot().await.unwrap().emails_sent_today, 2);
    }

    #[tokio::test]
    async fn test_cancel_and_backlog_stats() {
        let h = harness(MemoryTransport::accepting());
        let row = h.queue.insert(queued("guest@example.com", 5, 3)).await.unwrap();

        assert!(h.service.cancel_queued(row.id).await.unwrap());
        assert!(!h.service.cancel_queued(row.id).await.unwrap());
        assert_eq!(h.service.process_email_queue().await.processed, 0);

        let stats = h.service.backlog_stats().await.unwrap();
        assert_eq!(stats.queue.cancelled, 1);
        assert_eq!(stats.queue.pending, 0);
        assert_eq!(stats.log.pending, 0);
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_reclaimed_and_sent() {
        let h = harness(MemoryTransport::accepting());
        let abandoned = h.queue.insert(queued("a@example.com", 5, 2)).await.unwrap();
        let active = h.queue.insert(queued("b@example.com", 5, 2)).await.unwrap();
        h.queue
            .mark_processing(abandoned.id, Utc::now() - Duration::minutes(20))
            .await
            .unwrap();
        h.queue.mark_processing(active.id, Utc::now()).await.unwrap();

        let report = h.service.process_email_queue().await;
        assert_eq!(
            report,
            SweepReport {
                processed: 1,
                success: 1,
                failed: 0
            }
        );

        let stored = h.queue.get(abandoned.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Sent));
        assert_eq!(stored.current_attempts, 3);

        // A claim inside the grace period still belongs to its sweep
        let stored = h.queue.get(active.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(QueueStatus::Processing));
        assert_eq!(h.transport.sent()[0].to, vec!["a@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_queue_retry_renders_the_original_created_at() {
        let h = harness(MemoryTransport::accepting());
        let mut row = queued("guest@example.com", 5, 3);
        row.template_key = "booking_receipt".to_string();
        row.email_data = serde_json::json!({ "created_at": "01/03/2024 18:45" });
        h.queue.insert(row).await.unwrap();

        assert_eq!(h.service.process_email_queue().await.success, 1);
        assert_eq!(
            h.transport.sent()[0].html,
            "<p>Requested 01/03/2024 18:45</p>"
        );
    }
}
