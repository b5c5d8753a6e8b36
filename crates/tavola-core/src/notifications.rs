//! Booking and contact notifications
//!
//! Thin helpers that turn domain events into outbox submissions. Email
//! failure never reaches the caller; the returned [`SubmitOutcome`] is only
//! informational.

use crate::outbox::{Outbox, SubmitOutcome};
use crate::service::EmailSendRequest;
use crate::template_data::guest_text;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tavola_common::types::{BookingId, ContactId};
use tracing::debug;

pub const BOOKING_CONFIRMATION: &str = "booking_confirmation";
pub const BOOKING_CANCELLATION: &str = "booking_cancellation";
pub const BOOKING_RECONFIRMATION: &str = "booking_reconfirmation";
pub const STAFF_BOOKING_ALERT: &str = "staff_booking_alert";
pub const CONTACT_RECEIVED: &str = "contact_received";

const PRIORITY_BOOKING: i32 = 8;
const PRIORITY_RECONFIRMATION: i32 = 6;
const PRIORITY_STAFF_ALERT: i32 = 4;
const PRIORITY_CONTACT: i32 = 3;

/// Booking fields used by the booking templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub id: BookingId,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: Option<String>,
    pub party_size: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub special_requests: Option<String>,
}

impl BookingDetails {
    fn request(&self, template_key: &str, recipient: &str, priority: i32) -> EmailSendRequest {
        EmailSendRequest::new(template_key, recipient)
            .recipient_name(self.guest_name.clone())
            .booking(self.id)
            .priority(priority)
            .with("booking_id", self.id.to_string())
            .with("guest_name", self.guest_name.clone())
            .with("guest_email", self.guest_email.clone())
            .with("guest_phone", self.guest_phone.clone().unwrap_or_default())
            .with("party_size", self.party_size)
            .with("guest_text", guest_text(u64::from(self.party_size)))
            .with("booking_date", self.date.format("%A %-d %B %Y").to_string())
            .with("booking_time", self.time.format("%H:%M").to_string())
            .with(
                "special_requests",
                self.special_requests.clone().unwrap_or_default(),
            )
    }
}

/// Contact form submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: ContactId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
}

/// Notification helper bound to an outbox
#[derive(Clone)]
pub struct BookingNotifier {
    outbox: Outbox,
}

impl BookingNotifier {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }

    pub async fn booking_confirmed(&self, booking: &BookingDetails) -> SubmitOutcome {
        self.submit(booking.request(
            BOOKING_CONFIRMATION,
            &booking.guest_email,
            PRIORITY_BOOKING,
        ))
        .await
    }

    pub async fn booking_cancelled(
        &self,
        booking: &BookingDetails,
        reason: Option<&str>,
    ) -> SubmitOutcome {
        let request = booking
            .request(BOOKING_CANCELLATION, &booking.guest_email, PRIORITY_BOOKING)
            .with("cancellation_reason", reason.unwrap_or_default());
        self.submit(request).await
    }

    /// Ask the guest to reconfirm; `confirm_url` is the link in the email
    pub async fn reconfirmation_needed(
        &self,
        booking: &BookingDetails,
        confirm_url: &str,
    ) -> SubmitOutcome {
        let request = booking
            .request(
                BOOKING_RECONFIRMATION,
                &booking.guest_email,
                PRIORITY_RECONFIRMATION,
            )
            .with("confirm_url", confirm_url);
        self.submit(request).await
    }

    pub async fn staff_new_booking_alert(
        &self,
        booking: &BookingDetails,
        staff_email: &str,
    ) -> SubmitOutcome {
        let mut request = booking.request(STAFF_BOOKING_ALERT, staff_email, PRIORITY_STAFF_ALERT);
        request.recipient_name = None;
        self.submit(request).await
    }

    /// Acknowledge a contact form submission to the sender
    pub async fn contact_form_received(&self, contact: &ContactMessage) -> SubmitOutcome {
        let request = EmailSendRequest::new(CONTACT_RECEIVED, contact.email.clone())
            .recipient_name(contact.name.clone())
            .contact(contact.id)
            .priority(PRIORITY_CONTACT)
            .with("contact_name", contact.name.clone())
            .with("contact_email", contact.email.clone())
            .with("contact_phone", contact.phone.clone().unwrap_or_default())
            .with("contact_subject", contact.subject.clone().unwrap_or_default())
            .with("contact_message", contact.message.clone());
        self.submit(request).await
    }

    async fn submit(&self, request: EmailSendRequest) -> SubmitOutcome {
        let template_key = request.template_key.clone();
        let outcome = self.outbox.submit(request).await;
        debug!(template_key = %template_key, outcome = ?outcome, "Notification submitted");
        outcome
    }
}
