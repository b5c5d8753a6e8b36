//! Fixtures shared by the delivery, sweep and outbox tests

use crate::service::{EmailSendRequest, EmailService, ServiceOptions, Stores};
use crate::transport::{MemoryTransport, StaticTransportFactory};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tavola_common::Config;
use tavola_storage::memory::{
    MemoryDeliveryLog, MemoryEmailQueue, MemoryEmailSettings, MemoryRestaurant, MemoryTemplates,
};
use tavola_storage::models::{
    DeliveryLogEntry, DeliveryStatus, EmailSettings, EmailTemplate, NewQueuedEmail,
};
use uuid::Uuid;

pub const SENDER: &str = "bookings@trattoria.example";

pub struct Harness {
    pub service: Arc<EmailService>,
    pub transport: Arc<MemoryTransport>,
    pub log: Arc<MemoryDeliveryLog>,
    pub queue: Arc<MemoryEmailQueue>,
    pub settings: Arc<MemoryEmailSettings>,
}

pub fn default_settings() -> EmailSettings {
    EmailSettings {
        from_email: Some(SENDER.to_string()),
        from_name: Some("Trattoria".to_string()),
        ..Default::default()
    }
}

pub fn harness(transport: MemoryTransport) -> Harness {
    harness_with(transport, default_settings())
}

pub fn harness_with(transport: MemoryTransport, settings: EmailSettings) -> Harness {
    let transport = Arc::new(transport);
    let log = Arc::new(MemoryDeliveryLog::new());
    let queue = Arc::new(MemoryEmailQueue::new());
    let settings = Arc::new(MemoryEmailSettings::new(settings));
    let templates = Arc::new(MemoryTemplates::with_templates([
        EmailTemplate::new(
            "booking_confirmation",
            "Booking at {{restaurant_name}}",
            "<p>Hi {{recipient_name}}, see you soon. {{restaurant_footer}}</p>",
        ),
        EmailTemplate::new(
            "booking_receipt",
            "Your booking",
            "<p>Requested {{created_at}}</p>",
        ),
    ]));

    let stores = Stores {
        log: log.clone(),
        queue: queue.clone(),
        templates,
        settings: settings.clone(),
        restaurant: Arc::new(MemoryRestaurant::default()),
    };

    let mut config = Config::default();
    config.email.from_email = Some(SENDER.to_string());
    config.restaurant.name = "Trattoria".to_string();

    let service = Arc::new(EmailService::new(
        stores,
        Arc::new(StaticTransportFactory::new(transport.clone())),
        ServiceOptions::from_config(&config),
    ));

    Harness {
        service,
        transport,
        log,
        queue,
        settings,
    }
}

pub fn request(recipient: &str) -> EmailSendRequest {
    EmailSendRequest::new("booking_confirmation", recipient).recipient_name("Ada")
}

pub fn queued(recipient: &str, priority: i32, attempts: i32) -> NewQueuedEmail {
    let now = Utc::now();
    NewQueuedEmail {
        template_key: "booking_confirmation".to_string(),
        recipient_email: recipient.to_string(),
        recipient_name: None,
        email_data: serde_json::json!({}),
        booking_id: None,
        contact_id: None,
        scheduled_for: now,
        priority,
        current_attempts: attempts,
        max_attempts: 5,
        error_message: Some("rate limited".to_string()),
        process_after: now,
        idempotency_key: Some(Uuid::new_v4()),
    }
}

pub fn log_row(
    template_key: &str,
    status: DeliveryStatus,
    created_at: DateTime<Utc>,
) -> DeliveryLogEntry {
    DeliveryLogEntry {
        id: Uuid::now_v7(),
        template_key: template_key.to_string(),
        recipient_email: "guest@example.com".to_string(),
        recipient_name: Some("Ada".to_string()),
        subject: "Booking at Trattoria".to_string(),
        status: status.to_string(),
        provider_message_id: None,
        error_message: None,
        booking_id: Some(Uuid::new_v4()),
        contact_id: None,
        idempotency_key: Some(Uuid::new_v4()),
        attempt: 1,
        created_at,
        sent_at: None,
    }
}
