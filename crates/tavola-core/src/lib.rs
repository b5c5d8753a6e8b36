//! Tavola Core - Robust email delivery
//!
//! This crate provides the delivery pipeline used by the booking and contact
//! handlers: mail transports, template rendering, quota enforcement, the
//! retry-with-backoff orchestrator, the reconciliation sweeps over the retry
//! queue and the delivery log, and a non-blocking outbox for call sites that
//! must never wait on email.

pub mod error;
pub mod notifications;
pub mod outbox;
pub mod quota;
pub mod retry;
pub mod service;
pub mod sweep;
pub mod template;
pub mod template_data;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::SendError;
pub use notifications::{BookingDetails, BookingNotifier, ContactMessage};
pub use outbox::{Outbox, OutboxWorker, SubmitOutcome};
pub use quota::{QuotaDecision, QuotaGuard};
pub use retry::RetryPolicy;
pub use service::{
    BacklogStats, EmailSendRequest, EmailService, SendOutcome, SenderIdentity, ServiceOptions,
    Stores,
};
pub use sweep::SweepReport;
pub use template::{RenderedEmail, TemplateRenderer};
pub use template_data::{Branding, TemplateData};
pub use transport::{
    ConfiguredTransportFactory, LogTransport, MailTransport, MemoryTransport, OutgoingEmail,
    ResendTransport, SmtpTransport, StaticTransportFactory, TransportFactory, TransportReceipt,
};
