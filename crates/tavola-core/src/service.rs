//! Robust email service
//!
//! `send_email_robust` renders and sends one message with a bounded number of
//! immediate attempts, backing off exponentially between them. Whatever is
//! still unsent afterwards lands in the retry queue for the sweeps in
//! [`crate::sweep`]. The public operations never return an error: storage
//! and transport failures are logged and folded into [`SendOutcome`].

use crate::error::SendError;
use crate::quota::QuotaGuard;
use crate::retry::RetryPolicy;
use crate::template::TemplateRenderer;
use crate::template_data::{stamp_created_at, Branding, TemplateData};
use crate::transport::{MailTransport, OutgoingEmail, TransportFactory, TransportReceipt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tavola_common::config::{Config, EmailConfig, RestaurantConfig};
use tavola_common::types::{format_mailbox, BookingId, ContactId, EmailAddress, LogId, QueueId};
use tavola_common::Result;
use tavola_storage::db::DatabasePool;
use tavola_storage::memory::{
    MemoryDeliveryLog, MemoryEmailQueue, MemoryEmailSettings, MemoryRestaurant, MemoryTemplates,
};
use tavola_storage::models::{
    DeliveryLogEntry, EmailSettings, LogStats, NewDeliveryLog, NewQueuedEmail, QueueStats,
    QueuedEmail,
};
use tavola_storage::repository::{
    DbDeliveryLogRepository, DbEmailQueueRepository, DbEmailSettingsRepository,
    DbRestaurantRepository, DbTemplateRepository, DeliveryLogRepository, EmailQueueRepository,
    EmailSettingsRepository, RestaurantRepository, TemplateRepository,
};
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// One logical send, as handed to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSendRequest {
    pub template_key: String,
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    /// Earliest send time; a future value goes straight to the queue
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Higher is more urgent
    #[serde(default)]
    pub priority: Option<i32>,
    /// Generated when absent
    #[serde(default)]
    pub idempotency_key: Option<Uuid>,
}

impl EmailSendRequest {
    pub fn new(template_key: impl Into<String>, recipient_email: impl Into<String>) -> Self {
        Self {
            template_key: template_key.into(),
            recipient_email: recipient_email.into(),
            recipient_name: None,
            data: Map::new(),
            booking_id: None,
            contact_id: None,
            scheduled_for: None,
            priority: None,
            idempotency_key: None,
        }
    }

    pub fn recipient_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_name = Some(name.into());
        self
    }

    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a single data field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn booking(mut self, booking_id: BookingId) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn contact(mut self, contact_id: ContactId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Rebuild the request stored on a queue row
    pub(crate) fn from_queued(row: &QueuedEmail) -> Self {
        Self {
            template_key: row.template_key.clone(),
            recipient_email: row.recipient_email.clone(),
            recipient_name: row.recipient_name.clone(),
            data: row.email_data.as_object().cloned().unwrap_or_default(),
            booking_id: row.booking_id,
            contact_id: row.contact_id,
            scheduled_for: Some(row.scheduled_for),
            priority: Some(row.priority),
            idempotency_key: row.idempotency_key,
        }
    }

    /// Best-effort request for a log row that never reached a terminal status
    ///
    /// The log keeps no data bag, so only the correlation ids are available
    /// to the template and the re-send may be missing fields.
    pub(crate) fn from_log_entry(entry: &DeliveryLogEntry) -> Self {
        let mut data = Map::new();
        stamp_created_at(&mut data, entry.created_at);
        if let Some(id) = entry.booking_id {
            data.insert("booking_id".to_string(), Value::String(id.to_string()));
        }
        if let Some(id) = entry.contact_id {
            data.insert("contact_id".to_string(), Value::String(id.to_string()));
        }

        Self {
            template_key: entry.template_key.clone(),
            recipient_email: entry.recipient_email.clone(),
            recipient_name: entry.recipient_name.clone(),
            data,
            booking_id: entry.booking_id,
            contact_id: entry.contact_id,
            scheduled_for: None,
            priority: None,
            idempotency_key: entry.idempotency_key,
        }
    }
}

/// Result of `send_email_robust`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    /// Delivery log id on success, retry queue id when the send was queued
    pub log_id: Option<Uuid>,
    /// Whether a retry queue row now owns the send
    pub queued: bool,
}

impl SendOutcome {
    fn sent(message_id: String, log_id: Option<LogId>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
            log_id,
            queued: false,
        }
    }

    fn queued_for_retry(attempts: u32, queue_id: QueueId) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(format!(
                "Failed after {} {}. Queued for retry.",
                attempts,
                plural(attempts, "attempt")
            )),
            log_id: Some(queue_id),
            queued: true,
        }
    }

    fn scheduled(queue_id: QueueId) -> Self {
        Self {
            success: false,
            message_id: None,
            error: None,
            log_id: Some(queue_id),
            queued: true,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error),
            log_id: None,
            queued: false,
        }
    }
}

/// Backlog counts for operators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogStats {
    pub queue: QueueStats,
    pub log: LogStats,
}

/// Sender identity; stored settings override configured values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub from_email: Option<String>,
    pub from_name: String,
    pub reply_to: Option<String>,
}

impl SenderIdentity {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self {
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            reply_to: config.reply_to.clone(),
        }
    }

    fn resolve(&self, settings: Option<&EmailSettings>) -> Self {
        Self {
            from_email: stored(settings.map(|s| &s.from_email))
                .or_else(|| self.from_email.clone()),
            from_name: stored(settings.map(|s| &s.from_name))
                .unwrap_or_else(|| self.from_name.clone()),
            reply_to: stored(settings.map(|s| &s.reply_to)).or_else(|| self.reply_to.clone()),
        }
    }
}

fn stored(value: Option<&Option<String>>) -> Option<String> {
    value
        .and_then(|v| v.clone())
        .filter(|v| !v.trim().is_empty())
}

fn plural(count: u32, noun: &str) -> String {
    if count == 1 {
        noun.to_string()
    } else {
        format!("{}s", noun)
    }
}

/// Service options
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub policy: RetryPolicy,
    pub sender: SenderIdentity,
    pub branding: RestaurantConfig,
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: RetryPolicy::from(&config.retry),
            sender: SenderIdentity::from_config(&config.email),
            branding: config.restaurant.clone(),
        }
    }
}

/// The stores the service reads and writes
#[derive(Clone)]
pub struct Stores {
    pub log: Arc<dyn DeliveryLogRepository>,
    pub queue: Arc<dyn EmailQueueRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub settings: Arc<dyn EmailSettingsRepository>,
    pub restaurant: Arc<dyn RestaurantRepository>,
}

impl Stores {
    /// Postgres-backed stores
    pub fn database(pool: DatabasePool) -> Self {
        Self {
            log: Arc::new(DbDeliveryLogRepository::new(pool.clone())),
            queue: Arc::new(DbEmailQueueRepository::new(pool.clone())),
            templates: Arc::new(DbTemplateRepository::new(pool.clone())),
            settings: Arc::new(DbEmailSettingsRepository::new(pool.clone())),
            restaurant: Arc::new(DbRestaurantRepository::new(pool)),
        }
    }

    /// Process-local stores, lost on restart
    pub fn in_memory() -> Self {
        Self {
            log: Arc::new(MemoryDeliveryLog::new()),
            queue: Arc::new(MemoryEmailQueue::new()),
            templates: Arc::new(MemoryTemplates::new()),
            settings: Arc::new(MemoryEmailSettings::new(EmailSettings::default())),
            restaurant: Arc::new(MemoryRestaurant::default()),
        }
    }
}

/// Where an attempt records itself in the delivery log
#[derive(Debug, Clone, Copy)]
pub(crate) enum LogTarget {
    /// Insert a fresh row for this attempt number
    New { attempt: i32 },
    /// Resolve a row left `pending` by an earlier process
    Existing(LogId),
}

/// Outcome of a single attempt
pub(crate) struct AttemptReport {
    pub log_id: Option<LogId>,
    pub result: std::result::Result<TransportReceipt, SendError>,
}

struct PreparedSend {
    transport: Arc<dyn MailTransport>,
    email: OutgoingEmail,
}

/// Robust email service
pub struct EmailService {
    pub(crate) stores: Stores,
    quota: QuotaGuard,
    renderer: TemplateRenderer,
    factory: Arc<dyn TransportFactory>,
    transport: OnceCell<Arc<dyn MailTransport>>,
    pub(crate) options: ServiceOptions,
}

impl EmailService {
    /// Create a new email service
    pub fn new(stores: Stores, factory: Arc<dyn TransportFactory>, options: ServiceOptions) -> Self {
        let quota = QuotaGuard::new(stores.settings.clone(), stores.log.clone());
        Self {
            stores,
            quota,
            renderer: TemplateRenderer::new(),
            factory,
            transport: OnceCell::new(),
            options,
        }
    }

    /// Send one message, retrying transient failures and queueing the rest
    #[instrument(
        skip(self, request),
        fields(template_key = %request.template_key, recipient = %request.recipient_email)
    )]
    pub async fn send_email_robust(&self, mut request: EmailSendRequest) -> SendOutcome {
        stamp_created_at(&mut request.data, Utc::now());
        let key = request.idempotency_key.unwrap_or_else(Uuid::new_v4);
        let policy = &self.options.policy;

        if let Some(at) = request.scheduled_for.filter(|at| *at > Utc::now()) {
            let priority = request.priority.unwrap_or(policy.fallback_priority);
            return match self.enqueue(&request, key, 0, None, priority).await {
                Ok(row) => {
                    info!(queue_id = %row.id, scheduled_for = %at, "Email scheduled");
                    SendOutcome::scheduled(row.id)
                }
                Err(e) => {
                    error!(error = %e, "Failed to schedule email");
                    SendOutcome::failed(format!("Failed to schedule email: {}", e))
                }
            };
        }

        let mut spent = 0u32;
        let mut last_error: Option<SendError> = None;

        for attempt in 1..=policy.immediate_attempts {
            spent = attempt;
            let report = self
                .attempt_once(&request, key, LogTarget::New { attempt: attempt as i32 })
                .await;

            match report.result {
                Ok(receipt) => {
                    info!(attempt, message_id = %receipt.message_id, "Email sent");
                    return SendOutcome::sent(receipt.message_id, report.log_id);
                }
                Err(err) => {
                    warn!(attempt, kind = err.kind(), error = %err, "Email attempt failed");
                    let retryable = err.is_retryable();
                    last_error = Some(err);

                    if !retryable {
                        break;
                    }
                    if attempt < policy.immediate_attempts {
                        sleep(policy.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        let error_text = last_error.map(|e| e.to_string());
        match self
            .enqueue(&request, key, spent as i32, error_text, policy.fallback_priority)
            .await
        {
            Ok(row) => {
                warn!(queue_id = %row.id, attempts = spent, "Email queued for retry");
                SendOutcome::queued_for_retry(spent, row.id)
            }
            Err(e) => {
                error!(error = %e, attempts = spent, "Failed to queue email for retry");
                SendOutcome::failed(format!(
                    "Failed after {} {} and could not be queued: {}",
                    spent,
                    plural(spent, "attempt"),
                    e
                ))
            }
        }
    }

    /// Persist a request for the queue sweep without attempting it now
    pub async fn enqueue_deferred(&self, request: &EmailSendRequest) -> Result<QueuedEmail> {
        let key = request.idempotency_key.unwrap_or_else(Uuid::new_v4);
        let priority = request
            .priority
            .unwrap_or(self.options.policy.fallback_priority);
        self.enqueue(request, key, 0, None, priority).await
    }

    /// Cancel a queued email that has not been picked up yet
    pub async fn cancel_queued(&self, id: QueueId) -> Result<bool> {
        let cancelled = self.stores.queue.cancel(id).await?;
        if cancelled {
            info!(queue_id = %id, "Queued email cancelled");
        }
        Ok(cancelled)
    }

    /// Queue and log counts by status
    pub async fn backlog_stats(&self) -> Result<BacklogStats> {
        Ok(BacklogStats {
            queue: self.stores.queue.stats().await?,
            log: self.stores.log.stats().await?,
        })
    }

    async fn enqueue(
        &self,
        request: &EmailSendRequest,
        key: Uuid,
        attempts: i32,
        error: Option<String>,
        priority: i32,
    ) -> Result<QueuedEmail> {
        let now = Utc::now();
        let mut data = request.data.clone();
        stamp_created_at(&mut data, now);
        self.stores
            .queue
            .insert(NewQueuedEmail {
                template_key: request.template_key.clone(),
                recipient_email: request.recipient_email.clone(),
                recipient_name: request.recipient_name.clone(),
                email_data: Value::Object(data),
                booking_id: request.booking_id,
                contact_id: request.contact_id,
                scheduled_for: request.scheduled_for.unwrap_or(now),
                priority,
                current_attempts: attempts,
                max_attempts: self.options.policy.queue_max_attempts,
                error_message: error,
                process_after: now,
                idempotency_key: Some(key),
            })
            .await
    }

    /// One send attempt: quota, transport, render, log, send
    ///
    /// Shared by the immediate loop and both sweeps. A quota refusal leaves an
    /// existing log row untouched so the next pending sweep can retry it.
    pub(crate) async fn attempt_once(
        &self,
        request: &EmailSendRequest,
        key: Uuid,
        target: LogTarget,
    ) -> AttemptReport {
        let existing = match target {
            LogTarget::Existing(id) => Some(id),
            LogTarget::New { .. } => None,
        };
        let now = Utc::now();

        if let Some(reason) = self.quota.check(now).await.reason() {
            return AttemptReport {
                log_id: existing,
                result: Err(SendError::QuotaExceeded(reason)),
            };
        }

        let prepared = match self.prepare(request, key, now).await {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Some(id) = existing {
                    self.fail_log(id, &err).await;
                }
                return AttemptReport {
                    log_id: existing,
                    result: Err(err),
                };
            }
        };

        let log_id = match target {
            LogTarget::Existing(id) => Some(id),
            LogTarget::New { attempt } => {
                self.open_log(request, &prepared.email.subject, key, attempt)
                    .await
            }
        };

        let result = match timeout(
            self.options.policy.attempt_timeout,
            prepared.transport.send(&prepared.email),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout),
        };

        match &result {
            Ok(receipt) => {
                if let Some(id) = log_id {
                    match self
                        .stores
                        .log
                        .mark_sent(id, Some(&receipt.message_id), Utc::now())
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => warn!(log_id = %id, "Log entry already terminal, not marked sent"),
                        Err(e) => error!(log_id = %id, error = %e, "Failed to mark log entry sent"),
                    }
                }
                self.quota.record_send(Utc::now()).await;
            }
            Err(err) => {
                if let Some(id) = log_id {
                    self.fail_log(id, err).await;
                }
            }
        }

        AttemptReport { log_id, result }
    }

    async fn prepare(
        &self,
        request: &EmailSendRequest,
        key: Uuid,
        now: DateTime<Utc>,
    ) -> std::result::Result<PreparedSend, SendError> {
        let settings = self.stores.settings.get().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load email settings, using configured defaults");
            None
        });

        let transport = self.transport(settings.as_ref()).await?;

        let sender = self.options.sender.resolve(settings.as_ref());
        let from_email = sender.from_email.ok_or_else(|| {
            SendError::Permanent("Email service not configured: missing sender email".to_string())
        })?;

        if EmailAddress::parse(&request.recipient_email).is_none() {
            return Err(SendError::Permanent(format!(
                "Invalid recipient email address: {}",
                request.recipient_email
            )));
        }

        let template = match self.stores.templates.get_active(&request.template_key).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                return Err(SendError::Permanent(format!(
                    "Email template not found: {}",
                    request.template_key
                )))
            }
            Err(e) => {
                return Err(SendError::Transient(format!(
                    "Failed to load email template: {}",
                    e
                )))
            }
        };

        let restaurant = self.stores.restaurant.get().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load restaurant settings, using configured branding");
            None
        });
        let branding = Branding::resolve(restaurant.as_ref(), &self.options.branding);
        let data = TemplateData::assemble(
            &request.data,
            request.recipient_name.as_deref(),
            &branding,
            now,
        );
        let rendered = self.renderer.render(&template, &data);

        Ok(PreparedSend {
            transport,
            email: OutgoingEmail {
                from: format_mailbox(Some(&sender.from_name), &from_email),
                to: vec![request.recipient_email.clone()],
                subject: rendered.subject,
                html: rendered.html,
                reply_to: sender.reply_to,
                idempotency_key: Some(key),
            },
        })
    }

    /// Lazily build the transport; a failed build is retried on the next call
    async fn transport(
        &self,
        settings: Option<&EmailSettings>,
    ) -> std::result::Result<Arc<dyn MailTransport>, SendError> {
        self.transport
            .get_or_try_init(|| async {
                let transport = self.factory.create(settings).await?;
                info!(provider = transport.name(), "Mail transport initialized");
                Ok(transport)
            })
            .await
            .cloned()
    }

    async fn open_log(
        &self,
        request: &EmailSendRequest,
        subject: &str,
        key: Uuid,
        attempt: i32,
    ) -> Option<LogId> {
        let entry = NewDeliveryLog {
            template_key: request.template_key.clone(),
            recipient_email: request.recipient_email.clone(),
            recipient_name: request.recipient_name.clone(),
            subject: subject.to_string(),
            booking_id: request.booking_id,
            contact_id: request.contact_id,
            idempotency_key: Some(key),
            attempt,
        };

        match self.stores.log.insert(entry).await {
            Ok(row) => {
                debug!(log_id = %row.id, attempt, "Delivery log entry created");
                Some(row.id)
            }
            Err(e) => {
                error!(error = %e, attempt, "Failed to create delivery log entry");
                None
            }
        }
    }

    async fn fail_log(&self, id: LogId, err: &SendError) {
        match self.stores.log.mark_failed(id, &err.to_string()).await {
            Ok(true) => {}
            Ok(false) => debug!(log_id = %id, "Log entry already terminal, not marked failed"),
            Err(e) => error!(log_id = %id, error = %e, "Failed to mark log entry failed"),
        }
    }
}
