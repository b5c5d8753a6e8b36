//! Resend HTTP API transport
//!
//! See: https://resend.com/docs/api-reference/emails/send-email

use super::{MailTransport, OutgoingEmail, TransportReceipt};
use crate::error::SendError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Request body for `POST /emails`
#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Resend transport
pub struct ResendTransport {
    client: Client,
    api_url: String,
    api_key: String,
}

impl ResendTransport {
    /// Create a new Resend transport
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| SendError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }
}

/// Map a non-success status to an error class
///
/// 429 and 5xx are worth retrying; any other 4xx means the request itself is
/// wrong.
fn classify(status: StatusCode, message: String) -> SendError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SendError::Transient(message)
    } else {
        SendError::Permanent(message)
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, SendError> {
        let body = ResendRequest {
            from: &email.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
            reply_to: email.reply_to.as_deref(),
        };

        let mut request = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body);

        if let Some(key) = email.idempotency_key {
            request = request.header("Idempotency-Key", key.to_string());
        }

        let response = request.send().await.map_err(|e| {
            warn!("Resend request failed: {}", e);
            SendError::Transient(format!("Resend request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ResendErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        format!("Resend returned error status {}", status)
                    } else {
                        text
                    }
                });
            return Err(classify(status, message));
        }

        let parsed: ResendResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse Resend response: {}", e);
            SendError::Transient(format!("Failed to parse Resend response: {}", e))
        })?;

        // The provider accepted the message; fall back to our own key so the
        // log row still carries a correlation id.
        let message_id = parsed
            .id
            .or_else(|| email.idempotency_key.map(|k| k.to_string()))
            .unwrap_or_default();

        debug!(message_id = %message_id, "Resend accepted message");
        Ok(TransportReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}
