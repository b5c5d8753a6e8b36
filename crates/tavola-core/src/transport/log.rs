//! Development transport that only writes to the log

use super::{MailTransport, OutgoingEmail, TransportReceipt};
use crate::error::SendError;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Logs each message instead of sending it
#[derive(Debug, Default)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, SendError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            message_id = %message_id,
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            html_len = email.html.len(),
            "Email logged (not sent)"
        );
        Ok(TransportReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
