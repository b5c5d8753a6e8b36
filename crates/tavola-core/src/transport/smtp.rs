//! SMTP relay transport (lettre)

use super::{MailTransport, OutgoingEmail, TransportReceipt};
use crate::error::SendError;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tavola_common::config::SmtpRelayConfig;
use tracing::debug;
use uuid::Uuid;

/// SMTP relay transport
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Build a relay client; nothing is connected until the first send
    pub fn new(config: &SmtpRelayConfig) -> Result<Self, SendError> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                SendError::Permanent(format!("Failed to create SMTP transport: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

/// Build the MIME message
fn build_message(email: &OutgoingEmail) -> Result<Message, SendError> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|e| SendError::Permanent(format!("Invalid from address: {}", e)))?;

    let mut builder = Message::builder().from(from).subject(&email.subject);

    for recipient in &email.to {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| SendError::Permanent(format!("Invalid to address: {}", e)))?;
        builder = builder.to(to);
    }

    if let Some(reply_to) = &email.reply_to {
        let reply_to: Mailbox = reply_to
            .parse()
            .map_err(|e| SendError::Permanent(format!("Invalid reply-to address: {}", e)))?;
        builder = builder.reply_to(reply_to);
    }

    builder = builder.message_id(Some(message_id_for(email.idempotency_key)));

    builder
        .header(ContentType::TEXT_HTML)
        .body(email.html.clone())
        .map_err(|e| SendError::Permanent(format!("Failed to build email: {}", e)))
}

/// Message-ID derived from the idempotency key so that retries of one
/// logical send carry the same id and can be deduplicated downstream
fn message_id_for(key: Option<Uuid>) -> String {
    format!("<{}@tavola>", key.unwrap_or_else(Uuid::new_v4))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, SendError> {
        let message = build_message(email)?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(str::to_string)
            .unwrap_or_else(|| message_id_for(email.idempotency_key));

        match self.mailer.send(message).await {
            Ok(response) => {
                debug!("SMTP relay accepted message: {:?}", response.code());
                Ok(TransportReceipt { message_id })
            }
            Err(e) if e.is_permanent() => Err(SendError::Permanent(e.to_string())),
            Err(e) => Err(SendError::Transient(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
