//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tavola_common::types::{BookingId, ContactId, LogId, QueueId};

/// Delivery log status
///
/// Only `Pending`, `Sent` and `Failed` are written by the delivery core; the
/// rest are reserved for provider webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
    Spam,
    Unsubscribed,
}

impl DeliveryStatus {
    /// Whether the core must never move a row out of this status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Opened => write!(f, "opened"),
            DeliveryStatus::Clicked => write!(f, "clicked"),
            DeliveryStatus::Bounced => write!(f, "bounced"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Spam => write!(f, "spam"),
            DeliveryStatus::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "opened" => Ok(DeliveryStatus::Opened),
            "clicked" => Ok(DeliveryStatus::Clicked),
            "bounced" => Ok(DeliveryStatus::Bounced),
            "failed" => Ok(DeliveryStatus::Failed),
            "spam" => Ok(DeliveryStatus::Spam),
            "unsubscribed" => Ok(DeliveryStatus::Unsubscribed),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Delivery log entry, one row per send attempt
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: LogId,
    pub template_key: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub booking_id: Option<BookingId>,
    pub contact_id: Option<ContactId>,
    pub idempotency_key: Option<uuid::Uuid>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryLogEntry {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }
}

/// Create delivery log input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeliveryLog {
    pub template_key: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub booking_id: Option<BookingId>,
    pub contact_id: Option<ContactId>,
    pub idempotency_key: Option<uuid::Uuid>,
    pub attempt: i32,
}

/// Delivery log counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    /// Rows in a provider-reported status (delivered, bounced, ...)
    pub other: i64,
}

/// Retry queue status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "pending"),
            QueueStatus::Processing => write!(f, "processing"),
            QueueStatus::Sent => write!(f, "sent"),
            QueueStatus::Failed => write!(f, "failed"),
            QueueStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            _ => Err(format!("Invalid queue status: {}", s)),
        }
    }
}

/// Retry queue entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: QueueId,
    pub template_key: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub email_data: serde_json::Value,
    pub booking_id: Option<BookingId>,
    pub contact_id: Option<ContactId>,
    pub scheduled_for: DateTime<Utc>,
    pub priority: i32,
    pub status: String,
    pub current_attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub process_after: DateTime<Utc>,
    pub idempotency_key: Option<uuid::Uuid>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedEmail {
    /// Get status enum
    pub fn status_enum(&self) -> Option<QueueStatus> {
        self.status.parse().ok()
    }

    /// Check if the row is eligible for a sweep at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status_enum(), Some(QueueStatus::Pending))
            && self.scheduled_for <= now
            && self.process_after <= now
    }
}

/// Create queued email input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueuedEmail {
    pub template_key: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub email_data: serde_json::Value,
    pub booking_id: Option<BookingId>,
    pub contact_id: Option<ContactId>,
    pub scheduled_for: DateTime<Utc>,
    pub priority: i32,
    pub current_attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub process_after: DateTime<Utc>,
    pub idempotency_key: Option<uuid::Uuid>,
}

/// Retry queue counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.sent + self.failed + self.cancelled
    }
}

/// Stored email template
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: uuid::Uuid,
    pub template_key: String,
    pub subject: String,
    pub html_content: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailTemplate {
    /// Build an active template, mostly useful for seeding and tests
    pub fn new(
        template_key: impl Into<String>,
        subject: impl Into<String>,
        html_content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7(),
            template_key: template_key.into(),
            subject: subject.into(),
            html_content: html_content.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Key of the single `email_settings` row
pub const SETTINGS_ROW_ID: uuid::Uuid = uuid::Uuid::nil();

/// Email settings: sender identity, credential and the daily quota counter
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailSettings {
    pub id: uuid::Uuid,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_daily_emails: i32,
    pub max_hourly_emails: i32,
    pub emails_sent_today: i32,
    pub last_reset_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: SETTINGS_ROW_ID,
            from_email: None,
            from_name: None,
            reply_to: None,
            api_key: None,
            max_daily_emails: 1000,
            max_hourly_emails: 100,
            emails_sent_today: 0,
            last_reset_date: now.date_naive(),
            updated_at: now,
        }
    }
}

/// Restaurant locale and branding settings
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct RestaurantSettings {
    pub id: uuid::Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub brand_color: Option<String>,
    pub website_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}
